//! Constant canonicalization and live-range shaping before lowering.

use std::collections::HashMap;

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{BlockId, Constant, Instruction, IrCode, Op, UseSite, ValueId},
    Result,
};

/// Index in the entry block right after the argument definitions.
fn after_arguments(code: &IrCode) -> usize {
    code.block(code.entry)
        .map(|b| {
            b.instructions
                .iter()
                .take_while(|instr| matches!(instr.op, Op::Argument { .. }))
                .count()
        })
        .unwrap_or(0)
}

/// Merges duplicate constants into one definition in the entry block.
pub struct ConstantCanonicalizer;

impl ConstantCanonicalizer {
    /// Returns the number of removed duplicate definitions.
    ///
    /// With `keep_locals` set, named constants are left alone.
    pub fn apply(code: &mut IrCode, keep_locals: bool) -> usize {
        let mut occurrences: Vec<(Constant, Vec<(BlockId, usize, ValueId)>)> = Vec::new();
        let mut slots: HashMap<Constant, usize> = HashMap::new();
        for (block, index, instr) in code.instructions() {
            let (Op::Const(constant), Some(dest)) = (&instr.op, instr.dest) else {
                continue;
            };
            if keep_locals && code.value(dest).local.is_some() {
                continue;
            }
            let slot = *slots.entry(constant.clone()).or_insert_with(|| {
                occurrences.push((constant.clone(), Vec::new()));
                occurrences.len() - 1
            });
            occurrences[slot].1.push((block, index, dest));
        }

        let mut removals: Vec<(BlockId, usize)> = Vec::new();
        let mut hoisted: Vec<(Constant, ValueId)> = Vec::new();
        let mut aliases: Vec<(ValueId, ValueId)> = Vec::new();
        for (constant, sites) in occurrences {
            let [(_, _, canonical), rest @ ..] = sites.as_slice() else {
                continue;
            };
            if rest.is_empty() {
                continue;
            }
            removals.extend(sites.iter().map(|&(block, index, _)| (block, index)));
            hoisted.push((constant, *canonical));
            aliases.extend(rest.iter().map(|&(_, _, dest)| (dest, *canonical)));
        }
        if hoisted.is_empty() {
            return 0;
        }

        removals.sort_unstable();
        for &(block, index) in removals.iter().rev() {
            if let Some(b) = code.block_mut(block) {
                b.instructions.remove(index);
            }
        }
        let at = after_arguments(code);
        let entry = code.entry;
        if let Some(b) = code.block_mut(entry) {
            for (offset, (constant, dest)) in hoisted.into_iter().enumerate() {
                b.instructions.insert(
                    at + offset,
                    Instruction::new(Op::Const(constant), Some(dest)),
                );
            }
        }
        for &(old, new) in &aliases {
            code.replace_all_uses(old, new);
        }
        aliases.len()
    }
}

impl IrPass for ConstantCanonicalizer {
    fn name(&self) -> &'static str {
        "constant-canonicalization"
    }

    fn description(&self) -> &'static str {
        "Shares one definition per distinct constant"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let merged = Self::apply(code, ctx.config.debug);
        if merged > 0 {
            ctx.events()
                .record(EventKind::ConstantCanonicalized)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("merged {merged} duplicate constants"));
        }
        Ok(merged > 0)
    }
}

/// Sinks entry-block constants into the only block that uses them.
pub struct LiveRangeShortener;

impl LiveRangeShortener {
    /// Returns the number of moved constants.
    pub fn apply(code: &mut IrCode, keep_locals: bool) -> usize {
        let uses = code.uses();
        let entry = code.entry;
        let Some(entry_block) = code.block(entry) else {
            return 0;
        };

        let mut moves: Vec<(usize, BlockId, usize)> = Vec::new();
        for (index, instr) in entry_block.instructions.iter().enumerate() {
            let (Op::Const(_), Some(dest)) = (&instr.op, instr.dest) else {
                continue;
            };
            if keep_locals && code.value(dest).local.is_some() {
                continue;
            }
            let mut target: Option<(BlockId, usize)> = None;
            let mut movable = !uses.is_unused(dest);
            for site in uses.sites(dest) {
                match *site {
                    UseSite::Instruction { block, index } if block != entry => match target {
                        None => target = Some((block, index)),
                        Some((b, first)) if b == block => target = Some((b, first.min(index))),
                        Some(_) => movable = false,
                    },
                    _ => movable = false,
                }
            }
            if let (true, Some((block, first_use))) = (movable, target) {
                moves.push((index, block, first_use));
            }
        }
        if moves.is_empty() {
            return 0;
        }

        let mut moved = Vec::with_capacity(moves.len());
        if let Some(b) = code.block_mut(entry) {
            for &(index, block, first_use) in moves.iter().rev() {
                let instr = b.instructions.remove(index);
                moved.push((block, first_use, instr));
            }
        }
        moved.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));
        let count = moved.len();
        for (block, first_use, instr) in moved.into_iter().rev() {
            if let Some(b) = code.block_mut(block) {
                b.instructions.insert(first_use, instr);
            }
        }
        count
    }
}

impl IrPass for LiveRangeShortener {
    fn name(&self) -> &'static str {
        "live-range-shortening"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let moved = Self::apply(code, ctx.config.debug);
        if moved > 0 {
            ctx.events()
                .record(EventKind::LiveRangeShortened)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("sank {moved} constants"));
        }
        Ok(moved > 0)
    }
}

/// Removes copies introduced for debug locals.
pub struct DebugLocalSimplifier;

impl DebugLocalSimplifier {
    /// Returns the number of removed moves.
    ///
    /// With `keep_locals` set, a move that gives a value a new local name stays.
    pub fn apply(code: &mut IrCode, keep_locals: bool) -> usize {
        let mut aliases = Vec::new();
        for (block, index, instr) in code.instructions() {
            let (Op::Move { src }, Some(dest)) = (&instr.op, instr.dest) else {
                continue;
            };
            let renames = keep_locals
                && code.value(dest).local.is_some()
                && code.value(dest).local != code.value(*src).local;
            if !renames {
                aliases.push((block, index, dest, *src));
            }
        }
        for &(block, index, _, _) in aliases.iter().rev() {
            if let Some(b) = code.block_mut(block) {
                b.instructions.remove(index);
            }
        }
        for &(_, _, dest, src) in &aliases {
            code.replace_all_uses(dest, src);
        }
        aliases.len()
    }
}

impl IrPass for DebugLocalSimplifier {
    fn name(&self) -> &'static str {
        "debug-local-simplification"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let removed = Self::apply(code, ctx.config.debug);
        if removed > 0 {
            ctx.events()
                .record(EventKind::InstructionRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {removed} local copies"));
        }
        Ok(removed > 0)
    }
}
