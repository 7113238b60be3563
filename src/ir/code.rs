//! The per-method IR container.
//!
//! An [`IrCode`] owns a block arena and a value arena. Block and value ids are
//! plain indices; removing a block leaves a hole so that ids held by passes
//! stay valid. Control flow lives exclusively in block terminators, so
//! predecessor lists are always recomputed rather than maintained.

use std::{
    collections::{HashMap, HashSet},
    fmt,
};

use crate::{
    ir::{Instruction, Op, ValueData, ValueId},
    program::MethodId,
    utils::graph::{
        algorithms::{compute_dominators, reachable, reverse_postorder, DominatorTree},
        GraphBase, NodeId, Successors,
    },
};

/// Identifier of a basic block inside one [`IrCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);

impl BlockId {
    /// Returns the arena index of this block.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }

    pub(crate) const fn node(self) -> NodeId {
        NodeId::new(self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

/// One incoming value of a phi.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhiOperand {
    /// The value flowing in.
    pub value: ValueId,
    /// The predecessor block the value flows in from.
    pub predecessor: BlockId,
}

/// A join of values at the start of a block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phi {
    /// The defined value.
    pub dest: ValueId,
    /// One operand per predecessor.
    pub operands: Vec<PhiOperand>,
}

impl Phi {
    /// The value flowing in from `predecessor`.
    #[must_use]
    pub fn operand_for(&self, predecessor: BlockId) -> Option<ValueId> {
        self.operands
            .iter()
            .find(|operand| operand.predecessor == predecessor)
            .map(|operand| operand.value)
    }

    /// If every operand is either the phi itself or one single value, returns that value.
    #[must_use]
    pub fn trivial_value(&self) -> Option<ValueId> {
        let mut unique = None;
        for operand in &self.operands {
            if operand.value == self.dest || Some(operand.value) == unique {
                continue;
            }
            if unique.is_some() {
                return None;
            }
            unique = Some(operand.value);
        }
        unique
    }
}

/// A straight-line sequence of instructions ending in one terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BasicBlock {
    /// Phis at block entry.
    pub phis: Vec<Phi>,
    /// The instructions; the last one is the terminator.
    pub instructions: Vec<Instruction>,
}

impl BasicBlock {
    /// Creates an empty block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The final instruction, if it is a terminator.
    #[must_use]
    pub fn terminator(&self) -> Option<&Instruction> {
        self.instructions.last().filter(|i| i.op.is_terminator())
    }

    /// Mutable access to the terminator.
    pub fn terminator_mut(&mut self) -> Option<&mut Instruction> {
        self.instructions
            .last_mut()
            .filter(|i| i.op.is_terminator())
    }

    /// Successor blocks, in terminator order.
    #[must_use]
    pub fn successors(&self) -> Vec<BlockId> {
        self.terminator()
            .map(|t| t.op.successors())
            .unwrap_or_default()
    }

    /// Index at which a new non-terminator instruction can be appended.
    #[must_use]
    pub fn insertion_point(&self) -> usize {
        if self.terminator().is_some() {
            self.instructions.len() - 1
        } else {
            self.instructions.len()
        }
    }
}

/// Where a value is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefSite {
    /// Defined by phi `index` of `block`.
    Phi {
        /// The block.
        block: BlockId,
        /// Index into the block's phis.
        index: usize,
    },
    /// Defined by instruction `index` of `block`.
    Instruction {
        /// The block.
        block: BlockId,
        /// Index into the block's instructions.
        index: usize,
    },
}

impl DefSite {
    /// The defining block.
    #[must_use]
    pub const fn block(self) -> BlockId {
        match self {
            Self::Phi { block, .. } | Self::Instruction { block, .. } => block,
        }
    }
}

/// Where a value is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UseSite {
    /// Operand of phi `index` in `block`, flowing in from `predecessor`.
    Phi {
        /// The block holding the phi.
        block: BlockId,
        /// Index into the block's phis.
        index: usize,
        /// The incoming edge.
        predecessor: BlockId,
    },
    /// Operand of instruction `index` in `block`.
    Instruction {
        /// The block.
        block: BlockId,
        /// Index into the block's instructions.
        index: usize,
    },
}

/// Snapshot of all use sites, keyed by value.
#[derive(Debug, Default, Clone)]
pub struct UseMap {
    sites: HashMap<ValueId, Vec<UseSite>>,
}

impl UseMap {
    /// All sites reading `value`; one entry per operand slot.
    #[must_use]
    pub fn sites(&self, value: ValueId) -> &[UseSite] {
        self.sites.get(&value).map_or(&[], Vec::as_slice)
    }

    /// Number of operand slots reading `value`.
    #[must_use]
    pub fn count(&self, value: ValueId) -> usize {
        self.sites(value).len()
    }

    /// Returns true if nothing reads `value`.
    #[must_use]
    pub fn is_unused(&self, value: ValueId) -> bool {
        self.count(value) == 0
    }

    /// Returns true if `value` is read by any phi.
    #[must_use]
    pub fn has_phi_users(&self, value: ValueId) -> bool {
        self.sites(value)
            .iter()
            .any(|site| matches!(site, UseSite::Phi { .. }))
    }
}

/// SSA code of one method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IrCode {
    /// The method this code belongs to.
    pub method: MethodId,
    /// The entry block.
    pub entry: BlockId,
    blocks: Vec<Option<BasicBlock>>,
    values: Vec<ValueData>,
}

impl IrCode {
    /// Creates code with a single empty entry block.
    #[must_use]
    pub fn new(method: MethodId) -> Self {
        Self {
            method,
            entry: BlockId(0),
            blocks: vec![Some(BasicBlock::new())],
            values: Vec::new(),
        }
    }

    /// Appends an empty block.
    pub fn add_block(&mut self) -> BlockId {
        self.blocks.push(Some(BasicBlock::new()));
        BlockId(self.blocks.len() - 1)
    }

    /// The block `id`, unless it was removed.
    #[must_use]
    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.0).and_then(Option::as_ref)
    }

    /// Mutable access to block `id`.
    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut BasicBlock> {
        self.blocks.get_mut(id.0).and_then(Option::as_mut)
    }

    /// Removes block `id` and drops phi operands flowing out of it.
    pub fn remove_block(&mut self, id: BlockId) -> Option<BasicBlock> {
        let removed = self.blocks.get_mut(id.0).and_then(Option::take)?;
        for successor in removed.successors() {
            if let Some(block) = self.block_mut(successor) {
                for phi in &mut block.phis {
                    phi.operands.retain(|operand| operand.predecessor != id);
                }
            }
        }
        Some(removed)
    }

    /// Ids of all live blocks in arena order.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        self.blocks
            .iter()
            .enumerate()
            .filter(|(_, block)| block.is_some())
            .map(|(index, _)| BlockId(index))
            .collect()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|block| block.is_some()).count()
    }

    /// Allocates a new value.
    pub fn new_value(&mut self, data: ValueData) -> ValueId {
        self.values.push(data);
        ValueId(self.values.len() - 1)
    }

    /// Metadata of `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` was not allocated by this code object.
    #[must_use]
    pub fn value(&self, value: ValueId) -> &ValueData {
        &self.values[value.0]
    }

    /// Metadata of `value`, if it was allocated by this code object.
    #[must_use]
    pub fn try_value(&self, value: ValueId) -> Option<&ValueData> {
        self.values.get(value.0)
    }

    /// Mutable metadata of `value`.
    pub fn value_mut(&mut self, value: ValueId) -> Option<&mut ValueData> {
        self.values.get_mut(value.0)
    }

    /// Number of allocated values.
    #[must_use]
    pub fn value_count(&self) -> usize {
        self.values.len()
    }

    /// Iterates over all instructions with their location.
    pub fn instructions(&self) -> impl Iterator<Item = (BlockId, usize, &Instruction)> {
        self.blocks.iter().enumerate().flat_map(|(index, block)| {
            block.iter().flat_map(move |block| {
                block
                    .instructions
                    .iter()
                    .enumerate()
                    .map(move |(position, instr)| (BlockId(index), position, instr))
            })
        })
    }

    /// Predecessor lists indexed by block index.
    ///
    /// Each predecessor appears once per block even if its terminator jumps to
    /// the block on several edges.
    #[must_use]
    pub fn predecessors(&self) -> Vec<Vec<BlockId>> {
        let mut predecessors = vec![Vec::new(); self.blocks.len()];
        for id in self.block_ids() {
            if let Some(block) = self.block(id) {
                for successor in block.successors() {
                    if successor.0 < predecessors.len() {
                        predecessors[successor.0].push(id);
                    }
                }
            }
        }
        predecessors
    }

    /// Blocks reachable from the entry in reverse postorder.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        reverse_postorder(self, self.entry.node())
            .into_iter()
            .map(|node| BlockId(node.index()))
            .collect()
    }

    /// Dominator tree of the control-flow graph.
    #[must_use]
    pub fn dominators(&self) -> DominatorTree {
        compute_dominators(self, self.entry.node())
    }

    /// Instruction count used by inlining budgets.
    ///
    /// Arguments, debug positions, gotos and non-null markers cost nothing;
    /// they disappear or become free during lowering.
    #[must_use]
    pub fn size_estimate(&self) -> usize {
        self.instructions()
            .filter(|(_, _, instr)| {
                !matches!(
                    instr.op,
                    Op::Argument { .. } | Op::DebugPosition | Op::Goto { .. } | Op::NonNull { .. }
                )
            })
            .count()
    }

    /// Collects every use site of every value.
    #[must_use]
    pub fn uses(&self) -> UseMap {
        let mut map = UseMap::default();
        for id in self.block_ids() {
            let Some(block) = self.block(id) else {
                continue;
            };
            for (index, phi) in block.phis.iter().enumerate() {
                for operand in &phi.operands {
                    map.sites.entry(operand.value).or_default().push(UseSite::Phi {
                        block: id,
                        index,
                        predecessor: operand.predecessor,
                    });
                }
            }
            for (index, instr) in block.instructions.iter().enumerate() {
                for value in instr.op.uses() {
                    map.sites
                        .entry(value)
                        .or_default()
                        .push(UseSite::Instruction { block: id, index });
                }
            }
        }
        map
    }

    /// Definition site of every defined value.
    #[must_use]
    pub fn definitions(&self) -> HashMap<ValueId, DefSite> {
        let mut defs = HashMap::new();
        for id in self.block_ids() {
            let Some(block) = self.block(id) else {
                continue;
            };
            for (index, phi) in block.phis.iter().enumerate() {
                defs.insert(phi.dest, DefSite::Phi { block: id, index });
            }
            for (index, instr) in block.instructions.iter().enumerate() {
                if let Some(dest) = instr.dest {
                    defs.insert(dest, DefSite::Instruction { block: id, index });
                }
            }
        }
        defs
    }

    /// The instruction defining `value`, if it is not a phi.
    #[must_use]
    pub fn defining_instruction(&self, value: ValueId) -> Option<&Instruction> {
        self.instructions()
            .find(|(_, _, instr)| instr.dest == Some(value))
            .map(|(_, _, instr)| instr)
    }

    /// Rewrites every read of `old` into a read of `new`.
    ///
    /// Returns the number of operand slots changed.
    pub fn replace_all_uses(&mut self, old: ValueId, new: ValueId) -> usize {
        let mut changed = 0;
        for block in self.blocks.iter_mut().flatten() {
            for phi in &mut block.phis {
                for operand in &mut phi.operands {
                    if operand.value == old {
                        operand.value = new;
                        changed += 1;
                    }
                }
            }
            for instr in &mut block.instructions {
                instr.op.for_each_use_mut(|operand| {
                    if *operand == old {
                        *operand = new;
                        changed += 1;
                    }
                });
            }
        }
        changed
    }

    /// Argument values ordered by argument index.
    #[must_use]
    pub fn arguments(&self) -> Vec<ValueId> {
        let mut arguments: Vec<(u16, ValueId)> = self
            .block(self.entry)
            .map(|block| {
                block
                    .instructions
                    .iter()
                    .filter_map(|instr| match (&instr.op, instr.dest) {
                        (Op::Argument { index }, Some(dest)) => Some((*index, dest)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        arguments.sort_by_key(|(index, _)| *index);
        arguments.into_iter().map(|(_, value)| value).collect()
    }

    /// Removes all blocks not reachable from the entry.
    ///
    /// Returns the number of removed blocks.
    pub fn remove_unreachable_blocks(&mut self) -> usize {
        let live = reachable(self, self.entry.node());
        let dead: Vec<BlockId> = self
            .block_ids()
            .into_iter()
            .filter(|id| !live[id.0])
            .collect();
        for id in &dead {
            self.remove_block(*id);
        }
        dead.len()
    }

    /// Moves instructions `at..` of `block` into a fresh block and links the two with a goto.
    ///
    /// Phi operands in the old successors are re-pointed at the new block.
    /// Phis of `block` stay where they are. Returns the new block.
    pub fn split_block(&mut self, block: BlockId, at: usize) -> Option<BlockId> {
        let tail = {
            let source = self.block_mut(block)?;
            if at > source.instructions.len() {
                return None;
            }
            source.instructions.split_off(at)
        };
        let position = tail
            .first()
            .map(|instr| instr.position.clone())
            .unwrap_or_default();
        let new_block = self.add_block();
        let successors = tail
            .last()
            .filter(|instr| instr.op.is_terminator())
            .map(|instr| instr.op.successors())
            .unwrap_or_default();
        if let Some(target) = self.block_mut(new_block) {
            target.instructions = tail;
        }
        for successor in successors {
            if let Some(succ) = self.block_mut(successor) {
                for phi in &mut succ.phis {
                    for operand in &mut phi.operands {
                        if operand.predecessor == block {
                            operand.predecessor = new_block;
                        }
                    }
                }
            }
        }
        if let Some(source) = self.block_mut(block) {
            source
                .instructions
                .push(Instruction::new(Op::Goto { target: new_block }, None).at(position));
        }
        Some(new_block)
    }

    /// Inserts an empty block on every edge from a multi-successor block to a multi-predecessor block.
    ///
    /// Returns the number of blocks inserted.
    pub fn split_critical_edges(&mut self) -> usize {
        let predecessors = self.predecessors();
        let mut edges = Vec::new();
        for id in self.block_ids() {
            let successors = self.block(id).map(BasicBlock::successors).unwrap_or_default();
            if successors.len() < 2 {
                continue;
            }
            for successor in successors {
                if predecessors[successor.0].len() > 1 {
                    edges.push((id, successor));
                }
            }
        }

        for &(from, to) in &edges {
            let position = self
                .block(from)
                .and_then(BasicBlock::terminator)
                .map(|t| t.position.clone())
                .unwrap_or_default();
            let middle = self.add_block();
            if let Some(block) = self.block_mut(middle) {
                block
                    .instructions
                    .push(Instruction::new(Op::Goto { target: to }, None).at(position));
            }
            if let Some(terminator) = self.block_mut(from).and_then(BasicBlock::terminator_mut) {
                terminator.op.replace_target(to, middle);
            }
            if let Some(block) = self.block_mut(to) {
                for phi in &mut block.phis {
                    for operand in &mut phi.operands {
                        if operand.predecessor == from {
                            operand.predecessor = middle;
                        }
                    }
                }
            }
        }
        edges.len()
    }

    /// Removes phis whose operands are all one value (or the phi itself).
    ///
    /// Runs to a fixpoint because replacing one phi can make another trivial.
    /// Returns the number of removed phis.
    pub fn remove_trivial_phis(&mut self) -> usize {
        let mut removed = 0;
        loop {
            let mut found = None;
            'search: for id in self.block_ids() {
                if let Some(block) = self.block(id) {
                    for (index, phi) in block.phis.iter().enumerate() {
                        if let Some(value) = phi.trivial_value() {
                            found = Some((id, index, phi.dest, value));
                            break 'search;
                        }
                    }
                }
            }
            let Some((block, index, dest, value)) = found else {
                return removed;
            };
            if let Some(block) = self.block_mut(block) {
                block.phis.remove(index);
            }
            self.replace_all_uses(dest, value);
            removed += 1;
        }
    }

    /// Methods referenced by invoke instructions, in first-occurrence order.
    #[must_use]
    pub fn invoked_methods(&self) -> Vec<MethodId> {
        let mut seen = HashSet::new();
        self.instructions()
            .filter_map(|(_, _, instr)| match &instr.op {
                Op::Invoke { method, .. } => Some(*method),
                _ => None,
            })
            .filter(|method| seen.insert(*method))
            .collect()
    }

    /// Orders reachable blocks into fallthrough chains.
    ///
    /// Traces start at blocks in reverse postorder and greedily continue with
    /// the fallthrough successor of the last block (the goto target, or the
    /// else target of a conditional branch) while it is still unplaced.
    #[must_use]
    pub fn trace_blocks(&self) -> Vec<BlockId> {
        let rpo = self.reverse_postorder();
        let mut placed: HashSet<BlockId> = HashSet::with_capacity(rpo.len());
        let live: HashSet<BlockId> = rpo.iter().copied().collect();
        let mut order = Vec::with_capacity(rpo.len());

        for &start in &rpo {
            let mut current = start;
            while placed.insert(current) {
                order.push(current);
                let next = self
                    .block(current)
                    .and_then(BasicBlock::terminator)
                    .and_then(|t| match t.op {
                        Op::Goto { target } => Some(target),
                        Op::If { else_target, .. } => Some(else_target),
                        _ => None,
                    });
                match next {
                    Some(next) if live.contains(&next) => current = next,
                    _ => break,
                }
            }
        }
        order
    }
}

impl GraphBase for IrCode {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }
}

impl Successors for IrCode {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.block(BlockId(node.index()))
            .map(BasicBlock::successors)
            .unwrap_or_default()
            .into_iter()
            .map(|block| block.node())
    }
}

impl fmt::Display for IrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "code {}:", self.method)?;
        for id in self.block_ids() {
            let Some(block) = self.block(id) else {
                continue;
            };
            writeln!(f, "  {id}:")?;
            for phi in &block.phis {
                let operands: Vec<String> = phi
                    .operands
                    .iter()
                    .map(|o| format!("{}:{}", o.predecessor, o.value))
                    .collect();
                writeln!(f, "    {} = phi({})", phi.dest, operands.join(", "))?;
            }
            for instr in &block.instructions {
                writeln!(f, "    {instr}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Constant, IfCond, ValueType};

    fn diamond() -> (IrCode, [BlockId; 4], ValueId) {
        let mut code = IrCode::new(MethodId(0));
        let entry = code.entry;
        let left = code.add_block();
        let right = code.add_block();
        let join = code.add_block();
        let arg = code.new_value(ValueData::new(ValueType::Int));
        let one = code.new_value(ValueData::new(ValueType::Int));
        let two = code.new_value(ValueData::new(ValueType::Int));
        let phi = code.new_value(ValueData::new(ValueType::Int));

        let b = code.block_mut(entry).unwrap();
        b.instructions
            .push(Instruction::new(Op::Argument { index: 0 }, Some(arg)));
        b.instructions.push(Instruction::new(
            Op::If {
                cond: IfCond::Eq,
                left: arg,
                right: None,
                then_target: left,
                else_target: right,
            },
            None,
        ));
        let b = code.block_mut(left).unwrap();
        b.instructions
            .push(Instruction::new(Op::Const(Constant::Int(1)), Some(one)));
        b.instructions
            .push(Instruction::new(Op::Goto { target: join }, None));
        let b = code.block_mut(right).unwrap();
        b.instructions
            .push(Instruction::new(Op::Const(Constant::Int(2)), Some(two)));
        b.instructions
            .push(Instruction::new(Op::Goto { target: join }, None));
        let b = code.block_mut(join).unwrap();
        b.phis.push(Phi {
            dest: phi,
            operands: vec![
                PhiOperand {
                    value: one,
                    predecessor: left,
                },
                PhiOperand {
                    value: two,
                    predecessor: right,
                },
            ],
        });
        b.instructions
            .push(Instruction::new(Op::Return { value: Some(phi) }, None));
        (code, [entry, left, right, join], phi)
    }

    #[test]
    fn test_predecessors_and_order() {
        let (code, [entry, left, right, join], _) = diamond();
        let preds = code.predecessors();
        assert_eq!(preds[join.0], vec![left, right]);
        assert!(preds[entry.0].is_empty());
        let rpo = code.reverse_postorder();
        assert_eq!(rpo.first(), Some(&entry));
        assert_eq!(rpo.last(), Some(&join));
        assert_eq!(code.trace_blocks(), vec![entry, right, join, left]);
    }

    #[test]
    fn test_size_estimate_skips_free_instructions() {
        let (code, _, _) = diamond();
        // if, const, const, return
        assert_eq!(code.size_estimate(), 4);
    }

    #[test]
    fn test_remove_block_drops_phi_operands() {
        let (mut code, [entry, left, _, join], phi) = diamond();
        let terminator = code.block_mut(entry).unwrap().terminator_mut().unwrap();
        terminator.op = Op::Goto {
            target: BlockId(2),
        };
        assert_eq!(code.remove_unreachable_blocks(), 1);
        assert!(code.block(left).is_none());
        assert_eq!(code.block(join).unwrap().phis[0].operands.len(), 1);
        assert_eq!(code.remove_trivial_phis(), 1);
        assert!(code.uses().is_unused(phi));
    }

    #[test]
    fn test_split_block_repoints_phis() {
        let (mut code, [_, left, _, join], _) = diamond();
        let tail = code.split_block(left, 1).unwrap();
        let phi = &code.block(join).unwrap().phis[0];
        assert_eq!(phi.operand_for(tail), Some(ValueId(1)));
        assert_eq!(phi.operand_for(left), None);
        assert_eq!(code.block(left).unwrap().successors(), vec![tail]);
    }

    #[test]
    fn test_split_critical_edges() {
        let mut code = IrCode::new(MethodId(0));
        let entry = code.entry;
        let exit = code.add_block();
        let arg = code.new_value(ValueData::new(ValueType::Int));
        let b = code.block_mut(entry).unwrap();
        b.instructions
            .push(Instruction::new(Op::Argument { index: 0 }, Some(arg)));
        b.instructions.push(Instruction::new(
            Op::If {
                cond: IfCond::Ne,
                left: arg,
                right: None,
                then_target: exit,
                else_target: exit,
            },
            None,
        ));
        code.block_mut(exit)
            .unwrap()
            .instructions
            .push(Instruction::new(Op::Return { value: None }, None));
        // A single successor is not a critical edge.
        assert_eq!(code.split_critical_edges(), 0);
    }
}
