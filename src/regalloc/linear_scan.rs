//! Instruction numbering, live intervals and the linear scan itself.

use std::collections::{HashMap, HashSet};

use crate::{
    ir::{BlockId, IrCode, Op, ValueId, ValueType},
    output::Register,
};

/// Distance between consecutive instruction numbers.
///
/// Odd numbers are definition points, so a value dying at an instruction can
/// share its register with the value that instruction defines.
pub const NUMBER_STEP: u32 = 2;

/// Instruction numbers in traced block order.
#[derive(Debug, Clone, Default)]
pub struct Numbering {
    order: Vec<BlockId>,
    block_start: HashMap<BlockId, u32>,
    block_end: HashMap<BlockId, u32>,
    instructions: HashMap<(BlockId, usize), u32>,
    last: u32,
}

impl Numbering {
    /// Numbers every instruction of the blocks in `order`.
    ///
    /// Each block reserves one number for its phis at its start.
    #[must_use]
    pub fn new(code: &IrCode, order: &[BlockId]) -> Self {
        let mut numbering = Self {
            order: order.to_vec(),
            ..Self::default()
        };
        let mut next = 0;
        for &id in order {
            let Some(block) = code.block(id) else {
                continue;
            };
            numbering.block_start.insert(id, next);
            next += NUMBER_STEP;
            for index in 0..block.instructions.len() {
                numbering.instructions.insert((id, index), next);
                next += NUMBER_STEP;
            }
            numbering.block_end.insert(id, next);
        }
        numbering.last = next;
        numbering
    }

    /// The traced block order.
    #[must_use]
    pub fn order(&self) -> &[BlockId] {
        &self.order
    }

    /// Number of the instruction at `index` in `block`.
    #[must_use]
    pub fn instruction(&self, block: BlockId, index: usize) -> Option<u32> {
        self.instructions.get(&(block, index)).copied()
    }

    /// Number reserved for the phis of `block`.
    #[must_use]
    pub fn block_start(&self, block: BlockId) -> u32 {
        self.block_start.get(&block).copied().unwrap_or(0)
    }

    /// Number of the terminator of `block`, where phi copies are placed.
    #[must_use]
    pub fn copy_point(&self, block: BlockId) -> u32 {
        self.block_end
            .get(&block)
            .map_or(0, |end| end.saturating_sub(NUMBER_STEP))
    }

    /// The highest number used.
    #[must_use]
    pub fn last(&self) -> u32 {
        self.last
    }
}

/// The range of instruction numbers over which a value must keep its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInterval {
    /// The value.
    pub value: ValueId,
    /// First number the value is live at.
    pub start: u32,
    /// Last number the value is live at, inclusive.
    pub end: u32,
    /// Register slots the value occupies.
    pub width: u32,
}

impl LiveInterval {
    /// Returns true if both intervals are live at some common number.
    #[must_use]
    pub fn overlaps(&self, other: &LiveInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }

    fn cover(&mut self, point: u32) {
        self.start = self.start.min(point);
        self.end = self.end.max(point);
    }
}

/// Computes one interval per value from block liveness.
///
/// Intervals are hulls: a value stays live from its first definition or
/// live-in point to its last use or live-out point, which extends values
/// live around a loop to the end of the back edge. With `keep_locals`, named
/// locals stay live to the end of the method.
#[must_use]
pub fn build_intervals(code: &IrCode, numbering: &Numbering, keep_locals: bool) -> Vec<LiveInterval> {
    let order = numbering.order();
    let live_in = live_in_sets(code, order);

    let mut intervals: HashMap<ValueId, LiveInterval> = HashMap::new();
    let mut touch = |value: ValueId, point: u32| {
        intervals
            .entry(value)
            .or_insert_with(|| LiveInterval {
                value,
                start: point,
                end: point,
                width: code.value(value).ty.width() as u32,
            })
            .cover(point);
    };

    for &id in order {
        let Some(block) = code.block(id) else {
            continue;
        };

        let start = numbering.block_start(id);
        for phi in &block.phis {
            touch(phi.dest, start);
        }
        if let Some(live) = live_in.get(&id) {
            for &value in live {
                touch(value, start);
            }
        }

        for (index, instr) in block.instructions.iter().enumerate() {
            let Some(number) = numbering.instruction(id, index) else {
                continue;
            };
            for value in instr.op.uses() {
                touch(value, number);
            }
            if let Some(dest) = instr.dest {
                touch(dest, number + 1);
            }
        }

        let terminator = block.terminator();
        let copy_point = numbering.copy_point(id);
        let copy_def = match terminator.map(|t| &t.op) {
            Some(Op::Goto { .. }) => copy_point + 1,
            _ => copy_point,
        };
        let successors = terminator.map(|t| t.op.successors()).unwrap_or_default();
        for &successor in &successors {
            let Some(target) = code.block(successor) else {
                continue;
            };
            for phi in &target.phis {
                if let Some(operand) = phi.operand_for(id) {
                    touch(operand, copy_point);
                    touch(phi.dest, copy_def);
                }
            }
            if let Some(live) = live_in.get(&successor) {
                for &value in live {
                    touch(value, copy_point + 1);
                }
            }
        }
    }

    if keep_locals {
        let last = numbering.last();
        for interval in intervals.values_mut() {
            if code.value(interval.value).local.is_some() {
                interval.end = last;
            }
        }
    }

    let mut intervals: Vec<LiveInterval> = intervals.into_values().collect();
    intervals.sort_by_key(|i| (i.start, i.value));
    intervals
}

/// Live-in sets by backward dataflow; phi results count as definitions of
/// their block and phi operands as uses at the end of the predecessor.
fn live_in_sets(code: &IrCode, order: &[BlockId]) -> HashMap<BlockId, HashSet<ValueId>> {
    let mut upward: HashMap<BlockId, HashSet<ValueId>> = HashMap::new();
    let mut defs: HashMap<BlockId, HashSet<ValueId>> = HashMap::new();
    for &id in order {
        let Some(block) = code.block(id) else {
            continue;
        };
        let mut defined: HashSet<ValueId> = block.phis.iter().map(|p| p.dest).collect();
        let mut used = HashSet::new();
        for instr in &block.instructions {
            for value in instr.op.uses() {
                if !defined.contains(&value) {
                    used.insert(value);
                }
            }
            if let Some(dest) = instr.dest {
                defined.insert(dest);
            }
        }
        upward.insert(id, used);
        defs.insert(id, defined);
    }

    let mut live_in: HashMap<BlockId, HashSet<ValueId>> = HashMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for &id in order.iter().rev() {
            let Some(block) = code.block(id) else {
                continue;
            };
            let mut live_out: HashSet<ValueId> = HashSet::new();
            let successors = block
                .terminator()
                .map(|t| t.op.successors())
                .unwrap_or_default();
            for successor in successors {
                if let Some(live) = live_in.get(&successor) {
                    live_out.extend(live.iter().copied());
                }
                if let Some(target) = code.block(successor) {
                    live_out.extend(target.phis.iter().filter_map(|p| p.operand_for(id)));
                }
            }

            let mut live: HashSet<ValueId> = upward.get(&id).cloned().unwrap_or_default();
            let defined = defs.get(&id);
            live.extend(
                live_out
                    .into_iter()
                    .filter(|v| defined.map_or(true, |d| !d.contains(v))),
            );
            if live_in.get(&id) != Some(&live) {
                live_in.insert(id, live);
                changed = true;
            }
        }
    }
    live_in
}

/// The result of linear scan.
#[derive(Debug, Clone, Default)]
pub struct Allocation {
    registers: HashMap<ValueId, Register>,
    intervals: Vec<LiveInterval>,
    arguments: Vec<(ValueId, u32)>,
    locals: u32,
    scratch: u32,
    incoming: u32,
}

impl Allocation {
    /// The first register of `value`.
    #[must_use]
    pub fn register(&self, value: ValueId) -> Option<Register> {
        self.registers.get(&value).copied()
    }

    /// The intervals the allocation was computed from, sorted by start.
    #[must_use]
    pub fn intervals(&self) -> &[LiveInterval] {
        &self.intervals
    }

    /// Slots used by non-argument values.
    #[must_use]
    pub fn locals(&self) -> u32 {
        self.locals
    }

    /// Slots reserved for breaking parallel-move cycles.
    #[must_use]
    pub fn scratch(&self) -> u32 {
        self.scratch
    }

    /// First scratch register.
    #[must_use]
    pub fn scratch_base(&self) -> Register {
        Register(self.locals)
    }

    /// Slots taken by incoming arguments.
    #[must_use]
    pub fn incoming(&self) -> u32 {
        self.incoming
    }

    /// Total frame size.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.locals as usize + self.scratch as usize + self.incoming as usize
    }

    /// Places the arguments above the locals and `scratch` scratch slots.
    pub fn pin_arguments(&mut self, scratch: u32) {
        self.scratch = scratch;
        let base = self.locals + scratch;
        for &(value, word) in &self.arguments {
            self.registers.insert(value, Register(base + word));
        }
    }
}

/// Assigns registers to all non-argument values.
///
/// Intervals are visited by increasing start; each value takes the lowest
/// register (pair, for wide values) not held by an overlapping active
/// interval. Every group in `contiguous` is placed as one block of
/// consecutive registers when its first member is reached. Arguments are
/// assigned word offsets from `argument_types` and pinned later by
/// [`Allocation::pin_arguments`].
#[must_use]
pub fn linear_scan(
    code: &IrCode,
    intervals: Vec<LiveInterval>,
    contiguous: &[Vec<ValueId>],
    argument_types: &[ValueType],
) -> Allocation {
    let mut allocation = Allocation::default();

    let mut offsets = Vec::with_capacity(argument_types.len());
    let mut words = 0;
    for ty in argument_types {
        offsets.push(words);
        words += ty.width() as u32;
    }
    let mut argument_values = HashSet::new();
    for (_, _, instr) in code.instructions() {
        if let (Op::Argument { index }, Some(dest)) = (&instr.op, instr.dest) {
            let index = usize::from(*index);
            let offset = match offsets.get(index) {
                Some(&offset) => offset,
                None => {
                    let offset = words;
                    words += code.value(dest).ty.width() as u32;
                    offset
                }
            };
            allocation.arguments.push((dest, offset));
            argument_values.insert(dest);
        }
    }
    allocation.incoming = words;

    let group_of: HashMap<ValueId, usize> = contiguous
        .iter()
        .enumerate()
        .flat_map(|(group, members)| members.iter().map(move |&v| (v, group)))
        .collect();
    let by_value: HashMap<ValueId, LiveInterval> =
        intervals.iter().map(|i| (i.value, *i)).collect();

    // (end, first register, width)
    let mut active: Vec<(u32, u32, u32)> = Vec::new();
    let mut locals = 0;

    for interval in &intervals {
        if argument_values.contains(&interval.value)
            || allocation.registers.contains_key(&interval.value)
        {
            continue;
        }
        active.retain(|&(end, _, _)| end >= interval.start);

        if let Some(&group) = group_of.get(&interval.value) {
            let members: Vec<LiveInterval> = contiguous[group]
                .iter()
                .filter_map(|v| by_value.get(v).copied())
                .collect();
            let width: u32 = members.iter().map(|m| m.width).sum();
            let base = lowest_free(&active, width);
            let mut register = base;
            for member in &members {
                allocation.registers.insert(member.value, Register(register));
                active.push((member.end, register, member.width));
                register += member.width;
            }
            locals = locals.max(base + width);
            continue;
        }

        let register = lowest_free(&active, interval.width);
        allocation
            .registers
            .insert(interval.value, Register(register));
        active.push((interval.end, register, interval.width));
        locals = locals.max(register + interval.width);
    }

    allocation.locals = locals;
    allocation.intervals = intervals;
    allocation.pin_arguments(0);
    allocation
}

fn lowest_free(active: &[(u32, u32, u32)], width: u32) -> u32 {
    let mut candidate = 0;
    loop {
        let clash = active
            .iter()
            .filter(|&&(_, register, taken)| register < candidate + width && candidate < register + taken)
            .map(|&(_, register, taken)| register + taken)
            .max();
        match clash {
            Some(next) => candidate = next.max(candidate + 1),
            None => return candidate,
        }
    }
}
