//! Sparse conditional constant propagation.
//!
//! Values are evaluated over the lattice `Undefined < Constant(c) < Overdefined`
//! while only following control-flow edges that can actually execute. This
//! finds constants flowing through phis of branches that are never taken,
//! which plain folding misses.
//!
//! After the analysis converges the pass:
//!
//! 1. Replaces pure definitions of constant values with `Const`
//! 2. Replaces constant phis with a `Const` at the start of their block
//! 3. Folds branches and switches whose key is constant into gotos
//! 4. Removes blocks that never execute

use std::collections::{HashMap, HashSet, VecDeque};

use crate::{
    compiler::{
        events::EventKind,
        pass::{IrPass, MethodContext},
    },
    ir::{
        BlockId, Constant, DefSite, IfCond, Instruction, IrCode, NumericType, Op, UnaryOp,
        UseMap, UseSite, ValueId,
    },
    Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lattice {
    Undefined,
    Constant(Constant),
    Overdefined,
}

impl Lattice {
    fn meet(&self, other: &Lattice) -> Lattice {
        match (self, other) {
            (Self::Undefined, x) | (x, Self::Undefined) => x.clone(),
            (Self::Constant(a), Self::Constant(b)) if a == b => Self::Constant(a.clone()),
            _ => Self::Overdefined,
        }
    }
}

/// Evaluates a pure operation on constant operands.
pub(crate) fn fold_op(op: &Op, operand: impl Fn(ValueId) -> Option<Constant>) -> Option<Constant> {
    match op {
        Op::Const(c) => Some(c.clone()),
        Op::Binary {
            op,
            ty,
            left,
            right,
        } => match (ty, operand(*left)?, operand(*right)?) {
            (NumericType::Int, Constant::Int(a), Constant::Int(b)) => {
                op.fold_int(a, b).map(Constant::Int)
            }
            // Shift distances of long shifts are ints.
            (NumericType::Long, Constant::Long(a), b) => {
                op.fold_long(a, b.as_i64()?).map(Constant::Long)
            }
            _ => None,
        },
        Op::Unary { op, ty, operand: x } => match (ty, operand(*x)?) {
            (NumericType::Int, Constant::Int(a)) => Some(Constant::Int(match op {
                UnaryOp::Neg => a.wrapping_neg(),
                UnaryOp::Not => !a,
            })),
            (NumericType::Long, Constant::Long(a)) => Some(Constant::Long(match op {
                UnaryOp::Neg => a.wrapping_neg(),
                UnaryOp::Not => !a,
            })),
            _ => None,
        },
        Op::Cmp { left, right } => {
            let (a, b) = (operand(*left)?.as_i64()?, operand(*right)?.as_i64()?);
            Some(Constant::Int(match a.cmp(&b) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Equal => 0,
                std::cmp::Ordering::Greater => 1,
            }))
        }
        Op::Convert { from, to, operand: x } => {
            let value = operand(*x)?.as_i64()?;
            Some(match (from, to) {
                (_, NumericType::Long) => Constant::Long(value),
                (_, NumericType::Int) => Constant::Int(value as i32),
            })
        }
        Op::Move { src } => operand(*src),
        _ => None,
    }
}

/// Numeric view of a constant used as a branch operand.
fn branch_operand(constant: &Constant, zero_test: bool) -> Option<i64> {
    match constant {
        Constant::Int(_) | Constant::Long(_) => constant.as_i64(),
        Constant::Null => Some(0),
        // A string is non-null, which is all a zero test can observe.
        Constant::String(_) => zero_test.then_some(1),
    }
}

/// Decides a branch whose operands are known; `None` if either is unknown.
pub(crate) fn evaluate_if(cond: IfCond, left: &Constant, right: Option<&Constant>) -> Option<bool> {
    match right {
        None => Some(cond.evaluate(branch_operand(left, true)?, 0)),
        Some(right) => {
            if matches!(left, Constant::String(_)) || matches!(right, Constant::String(_)) {
                return None;
            }
            Some(cond.evaluate(
                branch_operand(left, false)?,
                branch_operand(right, false)?,
            ))
        }
    }
}

struct Solver<'a> {
    code: &'a IrCode,
    uses: UseMap,
    values: HashMap<ValueId, Lattice>,
    executable_blocks: HashSet<BlockId>,
    executable_edges: HashSet<(BlockId, BlockId)>,
    block_work: VecDeque<BlockId>,
    value_work: VecDeque<ValueId>,
    definitions: HashMap<ValueId, DefSite>,
}

impl<'a> Solver<'a> {
    fn new(code: &'a IrCode) -> Self {
        Self {
            code,
            uses: code.uses(),
            values: HashMap::new(),
            executable_blocks: HashSet::new(),
            executable_edges: HashSet::new(),
            block_work: VecDeque::new(),
            value_work: VecDeque::new(),
            definitions: code.definitions(),
        }
    }

    fn get(&self, value: ValueId) -> Lattice {
        self.values.get(&value).cloned().unwrap_or(Lattice::Undefined)
    }

    fn constant(&self, value: ValueId) -> Option<Constant> {
        match self.get(value) {
            Lattice::Constant(c) => Some(c),
            _ => None,
        }
    }

    fn set(&mut self, value: ValueId, new: Lattice) {
        let old = self.get(value);
        let merged = old.meet(&new);
        if merged != old {
            self.values.insert(value, merged);
            self.value_work.push_back(value);
        }
    }

    fn mark_edge(&mut self, from: BlockId, to: BlockId) {
        if !self.executable_edges.insert((from, to)) {
            return;
        }
        if self.executable_blocks.insert(to) {
            self.block_work.push_back(to);
        } else {
            // New incoming edge: only the phis need re-evaluation.
            self.visit_phis(to);
        }
    }

    fn solve(&mut self) {
        let entry = self.code.entry;
        self.executable_blocks.insert(entry);
        self.block_work.push_back(entry);
        while !self.block_work.is_empty() || !self.value_work.is_empty() {
            while let Some(block) = self.block_work.pop_front() {
                self.visit_block(block);
            }
            while let Some(value) = self.value_work.pop_front() {
                let sites: Vec<UseSite> = self.uses.sites(value).to_vec();
                for site in sites {
                    match site {
                        UseSite::Phi { block, .. } => {
                            if self.executable_blocks.contains(&block) {
                                self.visit_phis(block);
                            }
                        }
                        UseSite::Instruction { block, index } => {
                            if self.executable_blocks.contains(&block) {
                                self.visit_instruction(block, index);
                            }
                        }
                    }
                }
            }
        }
    }

    fn visit_block(&mut self, block: BlockId) {
        self.visit_phis(block);
        let count = self.code.block(block).map_or(0, |b| b.instructions.len());
        for index in 0..count {
            self.visit_instruction(block, index);
        }
    }

    fn visit_phis(&mut self, block: BlockId) {
        let code = self.code;
        let Some(b) = code.block(block) else {
            return;
        };
        for phi in &b.phis {
            let mut result = Lattice::Undefined;
            for operand in &phi.operands {
                if self.executable_edges.contains(&(operand.predecessor, block)) {
                    result = result.meet(&self.get(operand.value));
                }
            }
            self.set(phi.dest, result);
        }
    }

    fn visit_instruction(&mut self, block: BlockId, index: usize) {
        let code = self.code;
        let Some(instr) = code.block(block).and_then(|b| b.instructions.get(index)) else {
            return;
        };
        match &instr.op {
            Op::Goto { target } => self.mark_edge(block, *target),
            Op::If {
                cond,
                left,
                right,
                then_target,
                else_target,
            } => {
                let left_value = self.get(*left);
                let right_value = right.map(|r| self.get(r));
                if left_value == Lattice::Undefined
                    || right_value.as_ref() == Some(&Lattice::Undefined)
                {
                    return;
                }
                let decided = match (&left_value, &right_value) {
                    (Lattice::Constant(l), None) => evaluate_if(*cond, l, None),
                    (Lattice::Constant(l), Some(Lattice::Constant(r))) => {
                        evaluate_if(*cond, l, Some(r))
                    }
                    _ => None,
                };
                match decided {
                    Some(true) => self.mark_edge(block, *then_target),
                    Some(false) => self.mark_edge(block, *else_target),
                    None => {
                        self.mark_edge(block, *then_target);
                        self.mark_edge(block, *else_target);
                    }
                }
            }
            Op::Switch {
                value,
                keys,
                targets,
                default,
            } => match self.get(*value) {
                Lattice::Undefined => {}
                Lattice::Constant(Constant::Int(key)) => {
                    let target = keys
                        .iter()
                        .position(|k| *k == key)
                        .map_or(*default, |i| targets[i]);
                    self.mark_edge(block, target);
                }
                _ => {
                    let mut all = targets.clone();
                    all.push(*default);
                    for target in all {
                        self.mark_edge(block, target);
                    }
                }
            },
            op => {
                let Some(dest) = instr.dest else {
                    return;
                };
                let operands = op.uses();
                let result = if operands
                    .iter()
                    .any(|v| self.get(*v) == Lattice::Undefined && self.is_defined(*v))
                {
                    Lattice::Undefined
                } else {
                    match fold_op(op, |v| self.constant(v)) {
                        Some(c) => Lattice::Constant(c),
                        None => Lattice::Overdefined,
                    }
                };
                // Arguments and effects never fold; everything non-pure starts overdefined.
                let result = if op.is_pure_computation() || matches!(op, Op::Move { .. }) {
                    result
                } else {
                    Lattice::Overdefined
                };
                self.set(dest, result);
            }
        }
    }

    fn is_defined(&self, value: ValueId) -> bool {
        self.definitions.contains_key(&value)
    }
}

/// Sparse conditional constant propagation pass.
pub struct ConstantPropagation;

impl ConstantPropagation {
    /// Runs the analysis and rewrite; returns (folded values, folded branches, removed blocks).
    pub fn apply(code: &mut IrCode) -> (usize, usize, usize) {
        let (constants, executable_blocks, executable_edges) = {
            let mut solver = Solver::new(code);
            solver.solve();
            let constants: HashMap<ValueId, Constant> = solver
                .values
                .iter()
                .filter_map(|(v, l)| match l {
                    Lattice::Constant(c) => Some((*v, c.clone())),
                    _ => None,
                })
                .collect();
            (constants, solver.executable_blocks, solver.executable_edges)
        };

        let mut folded = 0;
        let mut branches = 0;
        for block in code.block_ids() {
            if !executable_blocks.contains(&block) {
                continue;
            }
            let Some(b) = code.block_mut(block) else {
                continue;
            };

            // Constant phis become constants at block start.
            let mut inserted = Vec::new();
            b.phis.retain(|phi| match constants.get(&phi.dest) {
                Some(c) => {
                    inserted.push(Instruction::new(Op::Const(c.clone()), Some(phi.dest)));
                    false
                }
                None => true,
            });
            folded += inserted.len();
            let position = b
                .instructions
                .first()
                .map(|i| i.position.clone())
                .unwrap_or_default();
            for (offset, instr) in inserted.into_iter().enumerate() {
                b.instructions.insert(offset, instr.at(position.clone()));
            }

            for instr in &mut b.instructions {
                let Some(dest) = instr.dest else {
                    continue;
                };
                if matches!(instr.op, Op::Const(_)) {
                    continue;
                }
                if let Some(c) = constants.get(&dest) {
                    instr.op = Op::Const(c.clone());
                    folded += 1;
                }
            }

            // Branches with a single executable edge become gotos.
            if let Some(terminator) = b.terminator_mut() {
                let successors = terminator.op.successors();
                if successors.len() > 1 {
                    let live: Vec<BlockId> = successors
                        .iter()
                        .copied()
                        .filter(|s| executable_edges.contains(&(block, *s)))
                        .collect();
                    if live.len() == 1 {
                        terminator.op = Op::Goto { target: live[0] };
                        branches += 1;
                    }
                }
            }
        }

        // Drop phi operands of edges that no longer exist.
        let predecessors = code.predecessors();
        for block in code.block_ids() {
            let preds = &predecessors[block.index()];
            if let Some(b) = code.block_mut(block) {
                for phi in &mut b.phis {
                    phi.operands.retain(|o| preds.contains(&o.predecessor));
                }
            }
        }

        let dead: Vec<BlockId> = code
            .block_ids()
            .into_iter()
            .filter(|b| !executable_blocks.contains(b))
            .collect();
        for block in &dead {
            code.remove_block(*block);
        }
        code.remove_unreachable_blocks();
        code.remove_trivial_phis();
        (folded, branches, dead.len())
    }
}

impl IrPass for ConstantPropagation {
    fn name(&self) -> &'static str {
        "constant-propagation"
    }

    fn description(&self) -> &'static str {
        "Sparse conditional constant propagation"
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let (folded, branches, blocks) = Self::apply(code);
        let events = ctx.events();
        if folded > 0 {
            events
                .record(EventKind::ConstantFolded)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("folded {folded} values"));
        }
        if branches > 0 {
            events
                .record(EventKind::BranchSimplified)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("folded {branches} branches"));
        }
        if blocks > 0 {
            events
                .record(EventKind::BlockRemoved)
                .method(ctx.method)
                .pass(self.name())
                .message(format!("removed {blocks} blocks that never execute"));
        }
        Ok(folded + branches + blocks > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ir::{verify_ssa, BinaryOp, IrBuilder, ValueType},
        program::MethodId,
    };

    #[test]
    fn test_folds_arithmetic() {
        let mut b = IrBuilder::new(MethodId(0));
        let one = b.const_int(1);
        let two = b.const_int(2);
        let sum = b.binary(BinaryOp::Add, one, two);
        b.ret(Some(sum));
        let mut code = b.finish();

        let (folded, _, _) = ConstantPropagation::apply(&mut code);
        assert_eq!(folded, 1);
        let ret_def = code.defining_instruction(sum).unwrap();
        assert_eq!(ret_def.op, Op::Const(Constant::Int(3)));
    }

    #[test]
    fn test_folds_branch_and_phi() {
        let mut b = IrBuilder::new(MethodId(0));
        let x = b.argument(ValueType::Int);
        let zero = b.const_int(0);
        let then_block = b.new_block();
        let else_block = b.new_block();
        let join = b.new_block();
        b.if_zero(IfCond::Eq, zero, then_block, else_block);

        b.switch_to(then_block);
        let seven = b.const_int(7);
        b.goto(join);

        b.switch_to(else_block);
        let doubled = b.binary(BinaryOp::Add, x, x);
        b.goto(join);

        b.switch_to(join);
        let phi = b.phi(ValueType::Int, &[(then_block, seven), (else_block, doubled)]);
        b.ret(Some(phi));
        let mut code = b.finish();

        let (_, branches, blocks) = ConstantPropagation::apply(&mut code);
        assert_eq!(branches, 1);
        assert_eq!(blocks, 1);
        assert!(code.block(else_block).is_none());
        assert_eq!(
            code.defining_instruction(phi).map(|i| i.op.clone()),
            Some(Op::Const(Constant::Int(7)))
        );
        verify_ssa(&code, "constant-propagation").unwrap();
    }

    #[test]
    fn test_division_by_zero_not_folded() {
        let mut b = IrBuilder::new(MethodId(0));
        let one = b.const_int(1);
        let zero = b.const_int(0);
        let quotient = b.binary(BinaryOp::Div, one, zero);
        b.ret(Some(quotient));
        let mut code = b.finish();

        let (folded, _, _) = ConstantPropagation::apply(&mut code);
        assert_eq!(folded, 0);
        assert!(matches!(
            code.defining_instruction(quotient).map(|i| &i.op),
            Some(Op::Binary { .. })
        ));
    }

    #[test]
    fn test_evaluate_if_on_references() {
        assert_eq!(evaluate_if(IfCond::Eq, &Constant::Null, None), Some(true));
        assert_eq!(evaluate_if(IfCond::Ne, &Constant::string("a"), None), Some(true));
        assert_eq!(
            evaluate_if(IfCond::Eq, &Constant::string("a"), Some(&Constant::Null)),
            None
        );
        assert_eq!(
            evaluate_if(IfCond::Lt, &Constant::Int(1), Some(&Constant::Int(2))),
            Some(true)
        );
    }
}
