//! Class inlining.
//!
//! Removes allocations whose object never escapes the method. The object's
//! fields become SSA values: constructor stores and inlined method bodies
//! write them, reads are replaced by the last written value (or the field's
//! default), and the allocation itself disappears.
//!
//! # Roots
//!
//! Roots are snapshotted once per method:
//!
//! - `new-instance` of an eligible class, initialized by a trivial constructor
//! - `static-get` of a singleton field written by a trivial class initializer
//!
//! # Gates
//!
//! Each root passes three gates in order. The first two reject a root for
//! good; a root with an ineligible user is retried in the next round, since
//! inlining another root may have removed that user. Rounds repeat until one
//! inlines nothing.
//!
//! | Gate | Checks | Failure |
//! |------|--------|---------|
//! | Class | instantiable program class, no finalizer, no initializer effects | permanent |
//! | Instance | no phi users, trivial constructor or singleton initializer | permanent |
//! | Usage | every user is an own-field access, a null check or an eligible call | retry |
//!
//! A called method whose body the caller may not see (its inlining
//! constraint rejects the caller's class) rejects the root permanently.
//!
//! Class eligibility is memoized in the [`CompilerContext`](crate::compiler::CompilerContext).

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use crate::{
    compiler::{
        events::EventKind,
        inliner::inline_call,
        pass::{IrPass, MethodContext},
        passes::{CastRemover, IfSimplifier, LibraryCallRewriter},
    },
    ir::{
        verify_ssa, BlockId, Constant, DefSite, Instruction, InvokeKind, IrCode, Op, Phi,
        PhiOperand, UseSite, ValueData, ValueId, ValueType,
    },
    program::{known, ClassId, FieldId, InitValue, MethodId, Program, TrivialClassInitializer},
    Result,
};

/// Why a root was not class-inlined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ClassInlineRejection {
    /// The root no longer exists.
    Removed,
    /// The class fails the class gate.
    IneligibleClass,
    /// The class is the holder of the method being optimized.
    OwnClass,
    /// The root flows into a phi.
    EscapesThroughPhi,
    /// The constructor is missing or does more than store fields.
    NoTrivialConstructor,
    /// The static read is not of a trivially initialized singleton.
    NotSingleton,
    /// The inlined users would exceed the class inlining limit.
    TooLarge,
    /// A user's body accesses members the caller cannot see.
    Constraint,
}

enum Outcome {
    Inlined(ClassId),
    Rejected(ClassInlineRejection),
    Retry,
}

/// A value stored by an expanded constructor.
#[derive(Debug, Clone)]
enum Stored {
    Value(ValueId),
    Constant(Constant),
}

struct Constructor {
    block: BlockId,
    index: usize,
    stores: Vec<(FieldId, Stored)>,
}

struct Candidate {
    root: ValueId,
    class: ClassId,
    block: BlockId,
    constructor: Option<Constructor>,
    callees: HashMap<MethodId, Arc<IrCode>>,
    calls: usize,
}

/// Returns true if instances of `class` may be replaced by their fields.
///
/// The result only depends on the class hierarchy, so it is safe to memoize.
#[must_use]
pub fn is_class_eligible(program: &Program, class: ClassId) -> bool {
    let Ok(declaration) = program.class(class) else {
        return false;
    };
    declaration.is_instantiable()
        && !declaration.is_library()
        && !program.declares_finalizer(class)
        && !program.has_clinit_side_effects(class)
}

/// The field stores performed by constructor `method`, super constructors first.
fn initializer_stores(program: &Program, method: MethodId) -> Option<Vec<(FieldId, InitValue)>> {
    let initializer = program.info(method).trivial_initializer?;
    let mut stores = match initializer.super_initializer {
        Some(parent) if !program.is_method(parent, known::OBJECT, known::INIT) => {
            let inherited = initializer_stores(program, parent)?;
            if inherited
                .iter()
                .any(|(_, value)| matches!(value, InitValue::Argument(_)))
            {
                return None;
            }
            inherited
        }
        _ => Vec::new(),
    };
    stores.extend(initializer.field_values);
    Some(stores)
}

/// Resolves a call on an object whose exact class is `class`.
fn resolve_exact(program: &Program, class: ClassId, kind: InvokeKind, method: MethodId) -> Option<MethodId> {
    match kind {
        InvokeKind::Virtual | InvokeKind::Interface => program.lookup_virtual(class, method),
        InvokeKind::Direct | InvokeKind::Super => Some(method),
        InvokeKind::Static => None,
    }
}

fn analyze(
    code: &IrCode,
    ctx: &MethodContext<'_>,
    root: ValueId,
) -> std::result::Result<Candidate, Outcome> {
    let program = ctx.program;
    let reject = |reason| Err(Outcome::Rejected(reason));

    let Some(&DefSite::Instruction { block, index }) = code.definitions().get(&root) else {
        return reject(ClassInlineRejection::Removed);
    };
    let Some(definition) = code.block(block).and_then(|b| b.instructions.get(index)) else {
        return reject(ClassInlineRejection::Removed);
    };
    let (class, allocation) = match definition.op {
        Op::NewInstance { class } => (class, true),
        Op::StaticGet { field } => {
            let Ok(declaration) = program.field(field) else {
                return reject(ClassInlineRejection::NotSingleton);
            };
            let holder = declaration.holder;
            let singleton = program
                .find_method(holder, known::CLINIT)
                .and_then(|clinit| program.info(clinit).trivial_class_initializer)
                == Some(TrivialClassInitializer { field });
            if !singleton || !program.instance_fields_of(holder).is_empty() {
                return reject(ClassInlineRejection::NotSingleton);
            }
            (holder, false)
        }
        _ => return reject(ClassInlineRejection::Removed),
    };

    if ctx.declaration().is_ok_and(|m| m.holder == class) {
        return reject(ClassInlineRejection::OwnClass);
    }
    if !ctx
        .compiler
        .class_eligibility(class, || is_class_eligible(program, class))
    {
        return reject(ClassInlineRejection::IneligibleClass);
    }

    let uses = code.uses();
    if uses.has_phi_users(root) {
        return reject(ClassInlineRejection::EscapesThroughPhi);
    }
    let superclasses = program.superclasses(class);
    let own_field = |field: FieldId| {
        program
            .field(field)
            .is_ok_and(|f| !f.is_static() && superclasses.contains(&f.holder))
    };

    let mut candidate = Candidate {
        root,
        class,
        block,
        constructor: None,
        callees: HashMap::new(),
        calls: 0,
    };
    let mut size = 0;
    let mut aliases = vec![root];
    let mut seen = HashSet::from([root]);
    while let Some(alias) = aliases.pop() {
        if uses.has_phi_users(alias) {
            return Err(Outcome::Retry);
        }
        for site in uses.sites(alias) {
            let UseSite::Instruction { block: user_block, index: user_index } = *site else {
                return Err(Outcome::Retry);
            };
            let Some(user) = code
                .block(user_block)
                .and_then(|b| b.instructions.get(user_index))
            else {
                return Err(Outcome::Retry);
            };
            match &user.op {
                Op::InstanceGet { field, object } if *object == alias && own_field(*field) => {}
                Op::InstancePut {
                    field,
                    object,
                    value,
                } if *object == alias && !seen.contains(value) && own_field(*field) => {}
                Op::NullCheck { .. } => {}
                Op::Invoke { kind, method, args }
                    if args.first() == Some(&alias) && !args[1..].contains(&alias) =>
                {
                    let is_constructor = program
                        .method(*method)
                        .is_ok_and(|m| m.is_constructor() && m.holder == class);
                    if *kind == InvokeKind::Direct && is_constructor {
                        if !allocation || alias != root || candidate.constructor.is_some() {
                            return reject(ClassInlineRejection::NoTrivialConstructor);
                        }
                        if user_block != block || user_index < index {
                            return reject(ClassInlineRejection::NoTrivialConstructor);
                        }
                        let Some(stores) = initializer_stores(program, *method) else {
                            return reject(ClassInlineRejection::NoTrivialConstructor);
                        };
                        let mut resolved = Vec::with_capacity(stores.len());
                        for (field, value) in stores {
                            let stored = match value {
                                InitValue::Argument(position) => match args.get(position) {
                                    Some(v) if !seen.contains(v) => Stored::Value(*v),
                                    _ => return Err(Outcome::Retry),
                                },
                                InitValue::Constant(constant) => Stored::Constant(constant),
                            };
                            resolved.push((field, stored));
                        }
                        size += resolved.len();
                        candidate.constructor = Some(Constructor {
                            block: user_block,
                            index: user_index,
                            stores: resolved,
                        });
                        continue;
                    }

                    let Some(target) = resolve_exact(program, class, *kind, *method) else {
                        return Err(Outcome::Retry);
                    };
                    let info = program.info(target);
                    let Some(eligibility) = info.class_inliner_eligibility else {
                        return Err(Outcome::Retry);
                    };
                    let admitted = program.method(target).is_ok_and(|callee| {
                        ctx.declaration().is_ok_and(|caller| {
                            info.constraint().allows(callee.holder, caller.holder, || {
                                program.is_subtype(caller.holder, callee.holder)
                            })
                        })
                    });
                    if !admitted {
                        return reject(ClassInlineRejection::Constraint);
                    }
                    let Some(snapshot) = ctx.compiler.optimized_code(target) else {
                        return Err(Outcome::Retry);
                    };
                    size += info.size;
                    candidate.calls += 1;
                    candidate.callees.insert(target, snapshot);
                    if eligibility.returns_receiver {
                        if let Some(dest) = user.dest {
                            if seen.insert(dest) {
                                aliases.push(dest);
                            }
                        }
                    }
                }
                _ => return Err(Outcome::Retry),
            }
        }
    }

    if allocation && candidate.constructor.is_none() {
        return reject(ClassInlineRejection::NoTrivialConstructor);
    }
    if size >= ctx.config.class_inlining_instruction_limit {
        return reject(ClassInlineRejection::TooLarge);
    }
    Ok(candidate)
}

/// Replaces the constructor call with plain field stores.
fn expand_constructor(code: &mut IrCode, root: ValueId, constructor: Constructor) {
    let Some(position) = code
        .block(constructor.block)
        .and_then(|b| b.instructions.get(constructor.index))
        .map(|instr| instr.position.clone())
    else {
        return;
    };
    let mut replacement = Vec::with_capacity(constructor.stores.len() * 2);
    for (field, stored) in constructor.stores {
        let value = match stored {
            Stored::Value(value) => value,
            Stored::Constant(constant) => {
                let dest = code.new_value(ValueData::new(constant.ty()));
                replacement
                    .push(Instruction::new(Op::Const(constant), Some(dest)).at(position.clone()));
                dest
            }
        };
        replacement.push(
            Instruction::new(
                Op::InstancePut {
                    field,
                    object: root,
                    value,
                },
                None,
            )
            .at(position.clone()),
        );
    }
    if let Some(b) = code.block_mut(constructor.block) {
        b.instructions
            .splice(constructor.index..=constructor.index, replacement);
    }
}

/// Tracks the SSA value of each field of the inlined object.
struct FieldValues<'p> {
    program: &'p Program,
    root_block: BlockId,
    predecessors: Vec<Vec<BlockId>>,
    last_store: HashMap<(FieldId, BlockId), ValueId>,
    at_entry: HashMap<(FieldId, BlockId), ValueId>,
    defaults: HashMap<FieldId, ValueId>,
    default_definitions: Vec<Instruction>,
    phis: Vec<(BlockId, Phi)>,
}

impl FieldValues<'_> {
    fn field_type(&self, field: FieldId) -> ValueType {
        self.program
            .field(field)
            .map_or(ValueType::Int, |f| f.ty)
    }

    fn default_value(&mut self, code: &mut IrCode, field: FieldId) -> ValueId {
        if let Some(&value) = self.defaults.get(&field) {
            return value;
        }
        let ty = self.field_type(field);
        let dest = code.new_value(ValueData::new(ty));
        self.default_definitions
            .push(Instruction::new(Op::Const(ty.default_value()), Some(dest)));
        self.defaults.insert(field, dest);
        dest
    }

    fn at_exit(&mut self, code: &mut IrCode, field: FieldId, block: BlockId) -> ValueId {
        match self.last_store.get(&(field, block)) {
            Some(&value) => value,
            None => self.at_entry(code, field, block),
        }
    }

    fn at_entry(&mut self, code: &mut IrCode, field: FieldId, block: BlockId) -> ValueId {
        if block == self.root_block {
            return self.default_value(code, field);
        }
        if let Some(&value) = self.at_entry.get(&(field, block)) {
            return value;
        }
        let predecessors = self
            .predecessors
            .get(block.index())
            .cloned()
            .unwrap_or_default();
        let value = match predecessors.as_slice() {
            [] => self.default_value(code, field),
            [single] => self.at_exit(code, field, *single),
            _ => {
                let dest = code.new_value(ValueData::new(self.field_type(field)));
                self.at_entry.insert((field, block), dest);
                let operands = predecessors
                    .iter()
                    .map(|&predecessor| PhiOperand {
                        value: self.at_exit(code, field, predecessor),
                        predecessor,
                    })
                    .collect();
                self.phis.push((block, Phi { dest, operands }));
                dest
            }
        };
        self.at_entry.insert((field, block), value);
        value
    }
}

enum Access {
    Get(FieldId, ValueId),
    Put(FieldId, ValueId),
}

/// Replaces reads of the object's fields and removes the object.
fn scalarize(code: &mut IrCode, program: &Program, root: ValueId, root_block: BlockId) -> Result<()> {
    let mut accesses: Vec<(BlockId, Vec<Access>)> = Vec::new();
    let mut removals: Vec<(BlockId, usize)> = Vec::new();
    let mut last_store = HashMap::new();
    for id in code.block_ids() {
        let Some(b) = code.block(id) else {
            continue;
        };
        let mut local = Vec::new();
        for (index, instr) in b.instructions.iter().enumerate() {
            let access = match (&instr.op, instr.dest) {
                (Op::InstanceGet { field, object }, Some(dest)) if *object == root => {
                    Some(Access::Get(*field, dest))
                }
                (
                    Op::InstancePut {
                        field,
                        object,
                        value,
                    },
                    _,
                ) if *object == root => {
                    last_store.insert((*field, id), *value);
                    Some(Access::Put(*field, *value))
                }
                (Op::NullCheck { value }, _) if *value == root => None,
                _ if instr.dest == Some(root) => None,
                (op, _) if op.uses().contains(&root) => {
                    return Err(internal_error!(
                        "class inlining left a use of {} in {}",
                        root,
                        id
                    ));
                }
                _ => continue,
            };
            removals.push((id, index));
            if let Some(access) = access {
                local.push(access);
            }
        }
        if !local.is_empty() {
            accesses.push((id, local));
        }
    }

    let mut values = FieldValues {
        program,
        root_block,
        predecessors: code.predecessors(),
        last_store,
        at_entry: HashMap::new(),
        defaults: HashMap::new(),
        default_definitions: Vec::new(),
        phis: Vec::new(),
    };
    let mut forwarded: HashMap<ValueId, ValueId> = HashMap::new();
    for (block, local) in accesses {
        let mut current: HashMap<FieldId, ValueId> = HashMap::new();
        for access in local {
            match access {
                Access::Put(field, value) => {
                    current.insert(field, value);
                }
                Access::Get(field, dest) => {
                    let value = match current.get(&field) {
                        Some(&value) => value,
                        None => values.at_entry(code, field, block),
                    };
                    current.insert(field, value);
                    forwarded.insert(dest, value);
                }
            }
        }
    }

    let root_index = removals
        .iter()
        .find(|(block, index)| {
            *block == root_block
                && code
                    .block(*block)
                    .and_then(|b| b.instructions.get(*index))
                    .is_some_and(|instr| instr.dest == Some(root))
        })
        .map(|&(_, index)| index)
        .ok_or_else(|| internal_error!("class inlining root {} has no definition", root))?;

    let position = code
        .block(root_block)
        .and_then(|b| b.instructions.get(root_index))
        .map(|instr| instr.position.clone())
        .unwrap_or_default();
    for &(block, index) in removals.iter().rev() {
        if let Some(b) = code.block_mut(block) {
            b.instructions.remove(index);
        }
    }
    if let Some(b) = code.block_mut(root_block) {
        for (offset, instr) in values.default_definitions.into_iter().enumerate() {
            b.instructions
                .insert(root_index + offset, instr.at(position.clone()));
        }
    }
    for (block, phi) in values.phis {
        if let Some(b) = code.block_mut(block) {
            b.phis.push(phi);
        }
    }

    let resolve = |mut value: ValueId| {
        let mut steps = 0;
        while let Some(&next) = forwarded.get(&value) {
            if next == value || steps > forwarded.len() {
                break;
            }
            value = next;
            steps += 1;
        }
        value
    };
    let replacements: Vec<(ValueId, ValueId)> = forwarded
        .keys()
        .map(|&dest| (dest, resolve(dest)))
        .collect();
    for (dest, value) in replacements {
        code.replace_all_uses(dest, value);
    }
    Ok(())
}

/// Class inlining pass.
pub struct ClassInliner;

impl ClassInliner {
    /// Inlines every eligible root; returns the classes whose instances were removed.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidSsa`] if verification is enabled and the
    /// rewritten code is malformed, or [`crate::Error::Internal`] if a root
    /// keeps a user after rewriting.
    pub fn apply(code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<Vec<ClassId>> {
        let mut pending: Vec<ValueId> = code
            .instructions()
            .filter(|(_, _, instr)| {
                matches!(instr.op, Op::NewInstance { .. } | Op::StaticGet { .. })
            })
            .filter_map(|(_, _, instr)| instr.dest)
            .filter(|dest| code.value(*dest).ty == ValueType::Reference)
            .collect();

        let mut inlined = Vec::new();
        loop {
            let mut retry = Vec::new();
            let mut progress = false;
            for root in pending {
                match Self::inline_root(code, ctx, root)? {
                    Outcome::Inlined(class) => {
                        progress = true;
                        inlined.push(class);
                    }
                    Outcome::Rejected(reason) => {
                        tracing::trace!(method = %ctx.method, %root, %reason, "class inlining rejected");
                    }
                    Outcome::Retry => retry.push(root),
                }
            }
            if !progress || retry.is_empty() {
                break;
            }
            pending = retry;
        }
        Ok(inlined)
    }

    fn inline_root(code: &mut IrCode, ctx: &MethodContext<'_>, root: ValueId) -> Result<Outcome> {
        let candidate = match analyze(code, ctx, root) {
            Ok(candidate) => candidate,
            Err(outcome) => return Ok(outcome),
        };
        let Candidate {
            root,
            class,
            block,
            constructor,
            callees,
            calls,
        } = candidate;

        if let Some(constructor) = constructor {
            expand_constructor(code, root, constructor);
        }
        for _ in 0..calls {
            let site = code.instructions().find_map(|(b, i, instr)| match &instr.op {
                Op::Invoke { kind, method, args } if args.first() == Some(&root) => {
                    Some((b, i, *kind, *method))
                }
                _ => None,
            });
            let Some((call_block, call_index, kind, method)) = site else {
                break;
            };
            let callee = resolve_exact(ctx.program, class, kind, method)
                .and_then(|target| callees.get(&target))
                .ok_or_else(|| internal_error!("class inlining lost the target of {}", method))?;
            inline_call(code, call_block, call_index, callee, false)
                .ok_or_else(|| internal_error!("cannot splice {} into {}", method, ctx.method))?;
            code.remove_trivial_phis();
        }

        scalarize(code, ctx.program, root, block)?;
        code.remove_trivial_phis();
        if ctx.config.verify_ssa {
            verify_ssa(code, "class-inlining")?;
        }

        let name = ctx
            .program
            .class(class)
            .map_or_else(|_| class.to_string(), |c| c.name.clone());
        ctx.events()
            .record(EventKind::ClassInlined)
            .method(ctx.method)
            .pass("class-inlining")
            .message(format!("inlined instance of {name} ({calls} calls)"));
        Ok(Outcome::Inlined(class))
    }
}

impl IrPass for ClassInliner {
    fn name(&self) -> &'static str {
        "class-inlining"
    }

    fn description(&self) -> &'static str {
        "Replaces non-escaping objects by their fields"
    }

    fn should_run(&self, ctx: &MethodContext<'_>) -> bool {
        ctx.config.class_inlining_enabled()
    }

    fn run(&self, code: &mut IrCode, ctx: &MethodContext<'_>) -> Result<bool> {
        let classes = Self::apply(code, ctx)?;
        if classes.is_empty() {
            return Ok(false);
        }

        CastRemover::apply(code, ctx.program);
        IfSimplifier::apply(code);
        if !ctx.config.debug && !ctx.is_reachability_sensitive() {
            LibraryCallRewriter::apply(code, ctx.program);
        }
        if let Some(hook) = &ctx.config.testing.after_class_inlining {
            hook(ctx.method, &classes, code);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        compiler::{context::CompilerContext, passes::facts},
        config::OptimizerConfig,
        ir::IrBuilder,
        program::{Class, Constraint, Field, Method},
    };

    struct Fixture {
        program: Program,
        compiler: CompilerContext,
        class: ClassId,
        field: FieldId,
        constructor: MethodId,
        caller: MethodId,
    }

    fn finalize(fixture: &Fixture, method: MethodId, code: IrCode) {
        let info = facts::compute(&code, &fixture.program, method);
        fixture.program.update_info(method, |i| *i = info);
        fixture.program.mark_processed(method, Constraint::Always);
        fixture.compiler.publish_snapshot(method, code);
    }

    /// `class L { int x; L(int x) { super(); this.x = x; } }`
    fn fixture() -> Fixture {
        let program = Program::with_runtime_library();
        let object = program.find_class(known::OBJECT).unwrap();
        let object_init = program.find_method(object, known::INIT).unwrap();
        let class = program.add_class(Class::new("app.L").with_superclass(object));
        let field = program.add_field(Field::new(class, "x", ValueType::Int));
        let constructor = program.add_method(Method::constructor(class, vec![ValueType::Int]));
        let app = program.add_class(Class::new("app.Main").with_superclass(object));
        let caller = program.add_method(Method::new_static(
            app,
            "run",
            Vec::new(),
            Some(ValueType::Int),
        ));
        let fixture = Fixture {
            program,
            compiler: CompilerContext::new(),
            class,
            field,
            constructor,
            caller,
        };

        let mut b = IrBuilder::new(constructor);
        let this = b.receiver(class);
        let x = b.argument(ValueType::Int);
        b.invoke(InvokeKind::Direct, object_init, &[this], None);
        b.instance_put(field, this, x);
        b.ret(None);
        finalize(&fixture, constructor, b.finish());
        fixture
    }

    fn returned_value(code: &IrCode) -> Option<ValueId> {
        code.instructions().find_map(|(_, _, instr)| match instr.op {
            Op::Return { value } => value,
            _ => None,
        })
    }

    fn has_allocation(code: &IrCode) -> bool {
        code.instructions().any(|(_, _, instr)| {
            matches!(
                instr.op,
                Op::NewInstance { .. } | Op::InstanceGet { .. } | Op::InstancePut { .. }
            )
        })
    }

    #[test]
    fn test_field_read_of_fresh_object_becomes_constructor_argument() {
        let f = fixture();
        let mut b = IrBuilder::new(f.caller);
        let object = b.new_instance(f.class);
        let five = b.const_int(5);
        b.invoke(InvokeKind::Direct, f.constructor, &[object, five], None);
        let x = b.instance_get(f.field, object, ValueType::Int);
        b.ret(Some(x));
        let mut code = b.finish();

        let config = OptimizerConfig::default();
        let ctx = MethodContext::new(&f.program, &config, &f.compiler, f.caller);
        assert_eq!(ClassInliner::apply(&mut code, &ctx).unwrap(), vec![f.class]);
        assert!(!has_allocation(&code));
        assert_eq!(returned_value(&code), Some(five));
        assert_eq!(f.compiler.cached_class_eligibility(f.class), Some(true));
        verify_ssa(&code, "class-inlining").unwrap();
    }

    #[test]
    fn test_getter_call_is_force_inlined() {
        let f = fixture();
        let getter = f.program.add_method(Method::new(
            f.class,
            "getX",
            Vec::new(),
            Some(ValueType::Int),
        ));
        let mut b = IrBuilder::new(getter);
        let this = b.receiver(f.class);
        let x = b.instance_get(f.field, this, ValueType::Int);
        b.ret(Some(x));
        finalize(&f, getter, b.finish());

        let mut b = IrBuilder::new(f.caller);
        let object = b.new_instance(f.class);
        let seven = b.const_int(7);
        b.invoke(InvokeKind::Direct, f.constructor, &[object, seven], None);
        let read = b
            .invoke(InvokeKind::Virtual, getter, &[object], Some(ValueType::Int))
            .unwrap();
        b.ret(Some(read));
        let mut code = b.finish();

        let config = OptimizerConfig::default();
        let ctx = MethodContext::new(&f.program, &config, &f.compiler, f.caller);
        assert_eq!(ClassInliner::apply(&mut code, &ctx).unwrap(), vec![f.class]);
        assert!(!has_allocation(&code));
        assert!(code.invoked_methods().is_empty());
        assert_eq!(returned_value(&code), Some(seven));
    }

    #[test]
    fn test_escaping_object_is_kept() {
        let f = fixture();
        let sink = f.program.add_method(Method::new_static(
            f.class,
            "sink",
            vec![ValueType::Reference],
            None,
        ));
        let mut b = IrBuilder::new(f.caller);
        let object = b.new_instance(f.class);
        let five = b.const_int(5);
        b.invoke(InvokeKind::Direct, f.constructor, &[object, five], None);
        b.invoke(InvokeKind::Static, sink, &[object], None);
        let x = b.instance_get(f.field, object, ValueType::Int);
        b.ret(Some(x));
        let mut code = b.finish();
        let before = code.clone();

        let config = OptimizerConfig::default();
        let ctx = MethodContext::new(&f.program, &config, &f.compiler, f.caller);
        assert!(ClassInliner::apply(&mut code, &ctx).unwrap().is_empty());
        assert_eq!(code, before);
    }

    #[test]
    fn test_unwritten_field_reads_default() {
        let f = fixture();
        let other = f.program.add_field(Field::new(f.class, "y", ValueType::Long));
        let mut b = IrBuilder::new(f.caller);
        b.line(10);
        let object = b.new_instance(f.class);
        b.line(11);
        let five = b.const_int(5);
        b.invoke(InvokeKind::Direct, f.constructor, &[object, five], None);
        let y = b.instance_get(other, object, ValueType::Long);
        let narrowed = b.convert(crate::ir::NumericType::Int, y);
        b.ret(Some(narrowed));
        let mut code = b.finish();

        let config = OptimizerConfig::default();
        let ctx = MethodContext::new(&f.program, &config, &f.compiler, f.caller);
        assert_eq!(ClassInliner::apply(&mut code, &ctx).unwrap().len(), 1);
        let default = code
            .instructions()
            .find(|(_, _, instr)| instr.op == Op::Const(Constant::Long(0)))
            .map(|(_, _, instr)| instr.position.clone())
            .unwrap();
        // The default takes the position of the removed allocation.
        assert_eq!(default, crate::ir::Position::new(10, f.caller));
        verify_ssa(&code, "class-inlining").unwrap();
    }
}
