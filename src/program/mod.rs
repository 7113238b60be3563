//! The whole-program view.
//!
//! [`Program`] is the registry of classes, methods and fields the optimizer
//! works on, together with the mutable per-method state the pipeline needs:
//! the current [`Code`] of every method and its [`OptimizationInfo`].
//!
//! All members are append-only arenas ([`boxcar::Vec`]) addressed by dense
//! ids, so references handed out to worker threads stay valid while new
//! synthesized classes are registered. Per-method state lives in
//! [`dashmap::DashMap`]s; a worker only ever writes the entries of the method
//! it is processing.
//!
//! # Examples
//!
//! ```rust,ignore
//! use bytescope::program::{Class, Method, MethodFlags, Program};
//!
//! let program = Program::with_runtime_library();
//! let object = program.find_class("java.lang.Object").unwrap();
//! let main = program.add_class(Class::new("app.Main").with_superclass(object));
//! let run = program.add_method(Method::new(main, "run", vec![], None).with_flags(MethodFlags::STATIC));
//! ```

mod code;
mod info;

use std::{collections::HashSet, fmt};

use bitflags::bitflags;
use dashmap::{DashMap, DashSet};

use crate::{
    ir::{Constant, InvokeKind, ValueType},
    Error, Result,
};

pub use code::{Code, CodeSource};
pub use info::{
    ClassInlinerEligibility, Constraint, InitValue, OptimizationInfo, TrivialClassInitializer,
    TrivialInitializer,
};

/// Names of runtime-library members the optimizer knows about.
pub mod known {
    /// Root of the class hierarchy.
    pub const OBJECT: &str = "java.lang.Object";
    /// The string class.
    pub const STRING: &str = "java.lang.String";
    /// The boxed long class hosting `compare`.
    pub const LONG: &str = "java.lang.Long";
    /// The utility class hosting `requireNonNull`.
    pub const OBJECTS: &str = "java.util.Objects";
    /// Instance constructor name.
    pub const INIT: &str = "<init>";
    /// Class initializer name.
    pub const CLINIT: &str = "<clinit>";
    /// Finalizer method name.
    pub const FINALIZE: &str = "finalize";
    /// Synthetic field caching the assertion status of a class.
    pub const ASSERTIONS_DISABLED: &str = "$assertionsDisabled";
}

macro_rules! define_id {
    ($name:ident, $prefix:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(pub u32);

        impl $name {
            /// Creates an identifier from an arena index.
            #[must_use]
            pub const fn new(index: usize) -> Self {
                Self(index as u32)
            }

            /// Returns the arena index.
            #[must_use]
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

define_id!(ClassId, "c", "Identifier of a class in the [`Program`].");
define_id!(MethodId, "m", "Identifier of a method in the [`Program`].");
define_id!(FieldId, "f", "Identifier of a field in the [`Program`].");

bitflags! {
    /// Class access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClassFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Cannot be subclassed.
        const FINAL = 0x0010;
        /// An interface.
        const INTERFACE = 0x0200;
        /// Cannot be instantiated.
        const ABSTRACT = 0x0400;
        /// Generated by a compiler.
        const SYNTHETIC = 0x1000;
        /// Provided by the runtime; no code available.
        const LIBRARY = 0x0001_0000;
    }
}

bitflags! {
    /// Method access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MethodFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Only accessible from the holder.
        const PRIVATE = 0x0002;
        /// No receiver.
        const STATIC = 0x0008;
        /// Cannot be overridden.
        const FINAL = 0x0010;
        /// Holds the receiver's monitor.
        const SYNCHRONIZED = 0x0020;
        /// Implemented outside the bytecode.
        const NATIVE = 0x0100;
        /// No body.
        const ABSTRACT = 0x0400;
        /// Generated by a compiler.
        const SYNTHETIC = 0x1000;
        /// An instance constructor.
        const CONSTRUCTOR = 0x0001_0000;
        /// The class initializer.
        const CLASS_INITIALIZER = 0x0002_0000;
        /// Must be kept in the output even if unreferenced.
        const KEEP = 0x0004_0000;
        /// Observable through reachability (finalization, weak references).
        const REACHABILITY_SENSITIVE = 0x0008_0000;
    }
}

bitflags! {
    /// Field access and property flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FieldFlags: u32 {
        /// Publicly accessible.
        const PUBLIC = 0x0001;
        /// Only accessible from the holder.
        const PRIVATE = 0x0002;
        /// Class-level field.
        const STATIC = 0x0008;
        /// Assigned once.
        const FINAL = 0x0010;
        /// Accesses are synchronization points.
        const VOLATILE = 0x0040;
        /// Generated by a compiler.
        const SYNTHETIC = 0x1000;
    }
}

/// What running the class initializer of a class does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StaticInit {
    /// No class initializer.
    #[default]
    None,
    /// A class initializer without observable effects.
    Trivial,
    /// A class initializer with observable effects.
    SideEffects,
}

/// A class definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Class {
    /// Fully qualified name.
    pub name: String,
    /// Direct superclass; `None` only for the hierarchy root.
    pub superclass: Option<ClassId>,
    /// Directly implemented interfaces.
    pub interfaces: Vec<ClassId>,
    /// Access and property flags.
    pub flags: ClassFlags,
    /// Behaviour of the class initializer.
    pub static_init: StaticInit,
}

impl Class {
    /// A program class without superclass, flags or initializer.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            superclass: None,
            interfaces: Vec::new(),
            flags: ClassFlags::PUBLIC,
            static_init: StaticInit::None,
        }
    }

    /// A runtime-library class.
    #[must_use]
    pub fn library(name: &str) -> Self {
        let mut class = Self::new(name);
        class.flags |= ClassFlags::LIBRARY;
        class
    }

    /// Sets the superclass.
    #[must_use]
    pub fn with_superclass(mut self, superclass: ClassId) -> Self {
        self.superclass = Some(superclass);
        self
    }

    /// Adds an implemented interface.
    #[must_use]
    pub fn with_interface(mut self, interface: ClassId) -> Self {
        self.interfaces.push(interface);
        self
    }

    /// Adds flags.
    #[must_use]
    pub fn with_flags(mut self, flags: ClassFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Sets the class initializer behaviour.
    #[must_use]
    pub fn with_static_init(mut self, static_init: StaticInit) -> Self {
        self.static_init = static_init;
        self
    }

    /// Returns true if instances can be created directly.
    #[must_use]
    pub fn is_instantiable(&self) -> bool {
        !self
            .flags
            .intersects(ClassFlags::ABSTRACT | ClassFlags::INTERFACE)
    }

    /// Returns true for runtime-library classes.
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.flags.contains(ClassFlags::LIBRARY)
    }
}

/// A method declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    /// Declaring class.
    pub holder: ClassId,
    /// Simple name.
    pub name: String,
    /// Parameter types, excluding the receiver.
    pub params: Vec<ValueType>,
    /// Return type, `None` for void.
    pub ret: Option<ValueType>,
    /// Access and property flags.
    pub flags: MethodFlags,
}

impl Method {
    /// A public instance method.
    #[must_use]
    pub fn new(holder: ClassId, name: &str, params: Vec<ValueType>, ret: Option<ValueType>) -> Self {
        Self {
            holder,
            name: name.to_string(),
            params,
            ret,
            flags: MethodFlags::PUBLIC,
        }
    }

    /// A public static method.
    #[must_use]
    pub fn new_static(
        holder: ClassId,
        name: &str,
        params: Vec<ValueType>,
        ret: Option<ValueType>,
    ) -> Self {
        Self::new(holder, name, params, ret).with_flags(MethodFlags::STATIC)
    }

    /// An instance constructor.
    #[must_use]
    pub fn constructor(holder: ClassId, params: Vec<ValueType>) -> Self {
        Self::new(holder, known::INIT, params, None).with_flags(MethodFlags::CONSTRUCTOR)
    }

    /// A class initializer.
    #[must_use]
    pub fn class_initializer(holder: ClassId) -> Self {
        Self::new(holder, known::CLINIT, Vec::new(), None)
            .with_flags(MethodFlags::STATIC | MethodFlags::CLASS_INITIALIZER)
    }

    /// Adds flags.
    #[must_use]
    pub fn with_flags(mut self, flags: MethodFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Returns true if the method has no receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }

    /// Returns true for instance constructors.
    #[must_use]
    pub fn is_constructor(&self) -> bool {
        self.flags.contains(MethodFlags::CONSTRUCTOR)
    }

    /// Returns true for class initializers.
    #[must_use]
    pub fn is_class_initializer(&self) -> bool {
        self.flags.contains(MethodFlags::CLASS_INITIALIZER)
    }

    /// Returns true if the method has no body of its own.
    #[must_use]
    pub fn is_abstract(&self) -> bool {
        self.flags
            .intersects(MethodFlags::ABSTRACT | MethodFlags::NATIVE)
    }

    /// Types of all incoming arguments, receiver first.
    #[must_use]
    pub fn argument_types(&self) -> Vec<ValueType> {
        let mut types = Vec::with_capacity(self.params.len() + 1);
        if !self.is_static() {
            types.push(ValueType::Reference);
        }
        types.extend(self.params.iter().copied());
        types
    }

    /// Number of register slots taken by the incoming arguments.
    #[must_use]
    pub fn argument_words(&self) -> usize {
        self.argument_types().iter().map(|ty| ty.width()).sum()
    }

    /// Returns true if `other` can override this method.
    #[must_use]
    pub fn same_signature(&self, other: &Method) -> bool {
        self.name == other.name
            && self.params == other.params
            && self.ret == other.ret
            && self.is_static() == other.is_static()
    }
}

/// A field declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    /// Declaring class.
    pub holder: ClassId,
    /// Simple name.
    pub name: String,
    /// Type of the stored value.
    pub ty: ValueType,
    /// Access and property flags.
    pub flags: FieldFlags,
}

impl Field {
    /// An instance field.
    #[must_use]
    pub fn new(holder: ClassId, name: &str, ty: ValueType) -> Self {
        Self {
            holder,
            name: name.to_string(),
            ty,
            flags: FieldFlags::empty(),
        }
    }

    /// A static field.
    #[must_use]
    pub fn new_static(holder: ClassId, name: &str, ty: ValueType) -> Self {
        Self::new(holder, name, ty).with_flags(FieldFlags::STATIC)
    }

    /// Adds flags.
    #[must_use]
    pub fn with_flags(mut self, flags: FieldFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// Returns true for class-level fields.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(FieldFlags::STATIC)
    }
}

/// Registry of all classes, methods and fields plus per-method pipeline state.
pub struct Program {
    classes: boxcar::Vec<Class>,
    methods: boxcar::Vec<Method>,
    fields: boxcar::Vec<Field>,
    class_names: DashMap<String, ClassId>,
    class_methods: DashMap<ClassId, Vec<MethodId>>,
    class_fields: DashMap<ClassId, Vec<FieldId>>,
    direct_subclasses: DashMap<ClassId, Vec<ClassId>>,
    codes: DashMap<MethodId, Code>,
    infos: DashMap<MethodId, OptimizationInfo>,
    static_values: DashMap<FieldId, Constant>,
    removed: DashSet<MethodId>,
}

impl fmt::Debug for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Program")
            .field("classes", &self.classes.count())
            .field("methods", &self.methods.count())
            .field("fields", &self.fields.count())
            .field("removed", &self.removed.len())
            .finish()
    }
}

impl Default for Program {
    fn default() -> Self {
        Self {
            classes: boxcar::Vec::new(),
            methods: boxcar::Vec::new(),
            fields: boxcar::Vec::new(),
            class_names: DashMap::new(),
            class_methods: DashMap::new(),
            class_fields: DashMap::new(),
            direct_subclasses: DashMap::new(),
            codes: DashMap::new(),
            infos: DashMap::new(),
            static_values: DashMap::new(),
            removed: DashSet::new(),
        }
    }
}

impl Program {
    /// Creates an empty program.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a program pre-populated with the runtime-library members the
    /// optimizer has built-in knowledge of.
    #[must_use]
    pub fn with_runtime_library() -> Self {
        let program = Self::new();
        let object = program.add_class(Class::library(known::OBJECT));
        program.add_method(Method::constructor(object, Vec::new()));

        let string = program.add_class(
            Class::library(known::STRING)
                .with_superclass(object)
                .with_flags(ClassFlags::FINAL),
        );
        program.add_method(
            Method::new(string, "length", Vec::new(), Some(ValueType::Int))
                .with_flags(MethodFlags::FINAL),
        );
        program.add_method(
            Method::new(string, "isEmpty", Vec::new(), Some(ValueType::Int))
                .with_flags(MethodFlags::FINAL),
        );

        let long = program.add_class(
            Class::library(known::LONG)
                .with_superclass(object)
                .with_flags(ClassFlags::FINAL),
        );
        program.add_method(Method::new_static(
            long,
            "compare",
            vec![ValueType::Long, ValueType::Long],
            Some(ValueType::Int),
        ));

        let objects = program.add_class(
            Class::library(known::OBJECTS)
                .with_superclass(object)
                .with_flags(ClassFlags::FINAL),
        );
        program.add_method(Method::new_static(
            objects,
            "requireNonNull",
            vec![ValueType::Reference],
            Some(ValueType::Reference),
        ));
        program
    }

    /// Registers a class.
    pub fn add_class(&self, class: Class) -> ClassId {
        let name = class.name.clone();
        let superclass = class.superclass;
        let id = ClassId::new(self.classes.push(class));
        self.class_names.insert(name, id);
        if let Some(superclass) = superclass {
            self.direct_subclasses.entry(superclass).or_default().push(id);
        }
        id
    }

    /// Registers a method with its holder.
    pub fn add_method(&self, method: Method) -> MethodId {
        let holder = method.holder;
        let id = MethodId::new(self.methods.push(method));
        self.class_methods.entry(holder).or_default().push(id);
        id
    }

    /// Registers a method together with its body.
    pub fn add_method_with_code(&self, method: Method, code: Code) -> MethodId {
        let id = self.add_method(method);
        self.codes.insert(id, code);
        id
    }

    /// Registers a field with its holder.
    pub fn add_field(&self, field: Field) -> FieldId {
        let holder = field.holder;
        let id = FieldId::new(self.fields.push(field));
        self.class_fields.entry(holder).or_default().push(id);
        id
    }

    /// Looks up a class.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownClass`] if the id is not registered.
    pub fn class(&self, id: ClassId) -> Result<&Class> {
        self.classes.get(id.index()).ok_or(Error::UnknownClass(id))
    }

    /// Looks up a method.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownMethod`] if the id is not registered.
    pub fn method(&self, id: MethodId) -> Result<&Method> {
        self.methods.get(id.index()).ok_or(Error::UnknownMethod(id))
    }

    /// Looks up a field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownField`] if the id is not registered.
    pub fn field(&self, id: FieldId) -> Result<&Field> {
        self.fields.get(id.index()).ok_or(Error::UnknownField(id))
    }

    /// Finds a class by fully qualified name.
    #[must_use]
    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.class_names.get(name).map(|entry| *entry)
    }

    /// Finds the first method of `class` with the given name.
    #[must_use]
    pub fn find_method(&self, class: ClassId, name: &str) -> Option<MethodId> {
        self.methods_of(class)
            .into_iter()
            .find(|&id| self.method(id).is_ok_and(|m| m.name == name))
    }

    /// Finds the first field of `class` with the given name.
    #[must_use]
    pub fn find_field(&self, class: ClassId, name: &str) -> Option<FieldId> {
        self.fields_of(class)
            .into_iter()
            .find(|&id| self.field(id).is_ok_and(|f| f.name == name))
    }

    /// Returns true if `method` is `class_name.method_name`.
    #[must_use]
    pub fn is_method(&self, method: MethodId, class_name: &str, method_name: &str) -> bool {
        self.method(method).is_ok_and(|m| {
            m.name == method_name && self.class(m.holder).is_ok_and(|c| c.name == class_name)
        })
    }

    /// `Class.name` of a method, for diagnostics.
    #[must_use]
    pub fn describe(&self, method: MethodId) -> String {
        match self.method(method) {
            Ok(m) => match self.class(m.holder) {
                Ok(c) => format!("{}.{}", c.name, m.name),
                Err(_) => format!("{}.{}", m.holder, m.name),
            },
            Err(_) => method.to_string(),
        }
    }

    /// Methods declared by `class`, including removed ones.
    #[must_use]
    pub fn methods_of(&self, class: ClassId) -> Vec<MethodId> {
        self.class_methods
            .get(&class)
            .map(|methods| methods.clone())
            .unwrap_or_default()
    }

    /// Fields declared by `class`.
    #[must_use]
    pub fn fields_of(&self, class: ClassId) -> Vec<FieldId> {
        self.class_fields
            .get(&class)
            .map(|fields| fields.clone())
            .unwrap_or_default()
    }

    /// Instance fields declared by `class`.
    #[must_use]
    pub fn instance_fields_of(&self, class: ClassId) -> Vec<FieldId> {
        self.fields_of(class)
            .into_iter()
            .filter(|&id| self.field(id).is_ok_and(|f| !f.is_static()))
            .collect()
    }

    /// All class ids in registration order.
    #[must_use]
    pub fn class_ids(&self) -> Vec<ClassId> {
        (0..self.classes.count()).map(ClassId::new).collect()
    }

    /// All live method ids in registration order.
    #[must_use]
    pub fn method_ids(&self) -> Vec<MethodId> {
        (0..self.methods.count())
            .map(MethodId::new)
            .filter(|id| !self.removed.contains(id))
            .collect()
    }

    /// Number of registered methods, removed ones included.
    #[must_use]
    pub fn method_count(&self) -> usize {
        self.methods.count()
    }

    /// The superclass chain of `class`, starting with `class` itself.
    #[must_use]
    pub fn superclasses(&self, class: ClassId) -> Vec<ClassId> {
        let mut chain = Vec::new();
        let mut current = Some(class);
        while let Some(id) = current {
            if chain.contains(&id) {
                break;
            }
            chain.push(id);
            current = self.class(id).ok().and_then(|c| c.superclass);
        }
        chain
    }

    /// Returns true if `sub` is `sup` or inherits from it.
    #[must_use]
    pub fn is_subtype(&self, sub: ClassId, sup: ClassId) -> bool {
        let mut seen = HashSet::new();
        let mut work = vec![sub];
        while let Some(class) = work.pop() {
            if class == sup {
                return true;
            }
            if !seen.insert(class) {
                continue;
            }
            if let Ok(c) = self.class(class) {
                work.extend(c.superclass);
                work.extend(c.interfaces.iter().copied());
            }
        }
        false
    }

    /// All transitive subclasses of `class`, excluding `class`.
    #[must_use]
    pub fn subclasses(&self, class: ClassId) -> Vec<ClassId> {
        let mut result = Vec::new();
        let mut work = vec![class];
        while let Some(current) = work.pop() {
            if let Some(children) = self.direct_subclasses.get(&current) {
                for &child in children.iter() {
                    if !result.contains(&child) {
                        result.push(child);
                        work.push(child);
                    }
                }
            }
        }
        result
    }

    /// Live methods in subclasses of the holder that override `method`.
    #[must_use]
    pub fn overriders(&self, method: MethodId) -> Vec<MethodId> {
        let Ok(declaration) = self.method(method) else {
            return Vec::new();
        };
        self.subclasses(declaration.holder)
            .into_iter()
            .flat_map(|class| self.methods_of(class))
            .filter(|&id| {
                self.is_live(id) && self.method(id).is_ok_and(|m| m.same_signature(declaration))
            })
            .collect()
    }

    /// Resolves `method` as if invoked on an instance of `class`.
    #[must_use]
    pub fn lookup_virtual(&self, class: ClassId, method: MethodId) -> Option<MethodId> {
        let declaration = self.method(method).ok()?;
        self.superclasses(class).into_iter().find_map(|holder| {
            self.methods_of(holder).into_iter().find(|&id| {
                self.is_live(id)
                    && self
                        .method(id)
                        .is_ok_and(|m| !m.is_abstract() && m.same_signature(declaration))
            })
        })
    }

    /// The single concrete method a call of `kind` to `method` can reach.
    ///
    /// Non-virtual calls always resolve to the referenced method. Virtual and
    /// interface calls resolve only when exactly one concrete implementation
    /// exists among the method and its overriders.
    #[must_use]
    pub fn single_target(&self, kind: InvokeKind, method: MethodId) -> Option<MethodId> {
        let declaration = self.method(method).ok()?;
        if !self.is_live(method) {
            return None;
        }
        if !kind.is_dynamic() {
            return (!declaration.is_abstract()).then_some(method);
        }
        if declaration.is_static() {
            return None;
        }
        let mut candidates = self.overriders(method);
        candidates.push(method);
        let mut concrete = candidates
            .into_iter()
            .filter(|&id| self.method(id).is_ok_and(|m| !m.is_abstract()));
        match (concrete.next(), concrete.next()) {
            (Some(target), None) => Some(target),
            _ => None,
        }
    }

    /// Returns true if initializing `class` or any superclass has an observable effect.
    #[must_use]
    pub fn has_clinit_side_effects(&self, class: ClassId) -> bool {
        self.superclasses(class).into_iter().any(|id| {
            self.class(id)
                .is_ok_and(|c| c.static_init == StaticInit::SideEffects)
        })
    }

    /// Returns true if `class` or a superclass declares a finalizer.
    #[must_use]
    pub fn declares_finalizer(&self, class: ClassId) -> bool {
        self.superclasses(class).into_iter().any(|holder| {
            self.methods_of(holder).into_iter().any(|id| {
                self.method(id).is_ok_and(|m| {
                    m.name == known::FINALIZE && m.params.is_empty() && !m.is_static()
                })
            })
        })
    }

    /// The current body of `method`.
    #[must_use]
    pub fn code(&self, method: MethodId) -> Option<Code> {
        self.codes.get(&method).map(|code| code.clone())
    }

    /// Installs a new body for `method`.
    pub fn set_code(&self, method: MethodId, code: Code) {
        self.codes.insert(method, code);
    }

    /// A snapshot of the optimization info of `method`.
    #[must_use]
    pub fn info(&self, method: MethodId) -> OptimizationInfo {
        self.infos
            .get(&method)
            .map(|info| info.clone())
            .unwrap_or_default()
    }

    /// Mutates the optimization info of `method` in place.
    pub fn update_info<R>(&self, method: MethodId, f: impl FnOnce(&mut OptimizationInfo) -> R) -> R {
        let mut entry = self.infos.entry(method).or_default();
        f(&mut entry)
    }

    /// Marks `method` processed with the given inlining constraint.
    pub fn mark_processed(&self, method: MethodId, constraint: Constraint) {
        self.update_info(method, |info| info.processed = Some(constraint));
    }

    /// Resets the processed state of every method.
    pub fn clear_processed(&self) {
        for mut entry in self.infos.iter_mut() {
            entry.processed = None;
        }
    }

    /// The known constant value of a static field.
    #[must_use]
    pub fn static_value(&self, field: FieldId) -> Option<Constant> {
        self.static_values.get(&field).map(|value| value.clone())
    }

    /// Records the constant value of a static field.
    pub fn set_static_value(&self, field: FieldId, value: Constant) {
        self.static_values.insert(field, value);
    }

    /// Drops `method` and its body from the output.
    pub fn remove_method(&self, method: MethodId) {
        self.removed.insert(method);
        self.codes.remove(&method);
    }

    /// Returns true unless `method` was removed.
    #[must_use]
    pub fn is_live(&self, method: MethodId) -> bool {
        !self.removed.contains(&method)
    }

    /// A class name derived from `base` that is not yet taken.
    #[must_use]
    pub fn unique_class_name(&self, base: &str) -> String {
        if self.find_class(base).is_none() {
            return base.to_string();
        }
        (1..)
            .map(|n| format!("{base}{n}"))
            .find(|name| self.find_class(name).is_none())
            .unwrap_or_else(|| base.to_string())
    }
}
