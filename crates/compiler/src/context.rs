//! The mutable compilation context threaded through code generation.
//!
//! A single [`Context`] is created per `compile()` call and consumed by the
//! assembler once generation finishes. Per-function state (locals, block scopes,
//! const-ness) lives on a stack of [`Frame`]s pushed by [`Context::enter_function`];
//! everything else (interning, schemas, the function table, closure bookkeeping)
//! is shared across every function generated in this compilation, which is what
//! the spec's `fork()` buys without needing shared, mutable, reference-counted
//! state: nested function generation just pushes another frame on the same
//! `Context` rather than spawning an independent one.

use crate::error::{CompileError, ErrorCode, Warning};
use jz_core::{Kind, Schema, SchemaRegistry, StringInternTable};
use std::collections::{HashMap, HashSet};

/// Byte offset where interned string data begins in linear memory. Offset 0 is
/// never a valid pointer target, making a stray null check unambiguous.
pub const STRING_REGION_BASE: u32 = 8;

/// Byte offset of the typed-array arena. A typed-array pointer packs its byte
/// address into a 22-bit field, so the whole arena must sit below 4 MiB of
/// linear memory; it gets the span between the string region and the static
/// data.
pub const TYPED_REGION_BASE: u32 = 65536;

/// Byte offset where static array/object data segments begin, directly above
/// the typed arena's 22-bit horizon. The runtime heap starts wherever static
/// data ends.
pub const STATIC_REGION_BASE: u32 = 1 << 22;

/// Where a declared local physically lives once compiled.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSlot {
    pub index: u32,
    pub kind: Kind,
    /// The scope-mangled name used as the WAT local's identifier.
    pub mangled: String,
    /// Static metadata (object schema, regex id, ...) carried over from the
    /// declaration's initialiser, so `o.prop` still resolves after `o` has
    /// round-tripped through a local.
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone)]
pub struct GlobalDef {
    pub kind: Kind,
    pub init: String,
}

#[derive(Debug, Clone)]
pub struct FunctionDef {
    pub params: Vec<(String, Kind)>,
    pub return_kind: Kind,
    pub closure: Option<ClosureDescriptor>,
    /// Filled in once the body has been generated.
    pub wat: Option<String>,
    /// True once this function is referenced as a value and needs a function-table slot.
    pub table_index: Option<u32>,
    /// The `call_indirect`-compatible trampoline unpacking a boxed-args array into
    /// this function's positional parameters, generated lazily the first time the
    /// function is boxed as a value (see `funcs::ensure_table_slot`).
    pub trampoline: Option<String>,
}

/// Describes how a lifted (capturing) function receives its environment.
#[derive(Debug, Clone)]
pub struct ClosureDescriptor {
    pub env_type_id: u32,
}

/// One compiled regular expression: its source, its flag string, how many
/// capturing groups it declares, and the WAT text of its `match`/`exec`
/// function pair (`$regex_N` / `$regex_N_exec`).
#[derive(Debug, Clone)]
pub struct RegexDef {
    pub pattern: String,
    pub flags: String,
    pub group_count: u32,
    pub wat: String,
}

/// An environment struct shape: ordered `(field name, kind)` pairs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnvShape(pub Vec<(String, Kind)>);

impl EnvShape {
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|(n, _)| n == name)
    }
}

#[derive(Debug, Clone)]
pub struct StaticArray {
    pub offset: u32,
    pub elements: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct StaticObject {
    pub offset: u32,
    pub schema_id: u32,
    pub elements: Vec<f64>,
}

/// Which runtime helper modules the generator actually referenced; drives the
/// module assembler's dead-code elimination of unused stdlib functions.
#[derive(Debug, Clone, Default)]
pub struct UsedFeatures {
    pub memory: bool,
    pub string: bool,
    pub typed_array: bool,
    pub mapset: bool,
    pub regex_ids: Vec<u32>,
}

impl UsedFeatures {
    pub fn stdlib_modules(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.memory {
            out.push("memory");
        }
        if self.string {
            out.push("string");
        }
        if self.typed_array {
            out.push("typed_array");
        }
        if self.mapset {
            out.push("mapset");
        }
        if !self.regex_ids.is_empty() {
            out.push("regex_runtime");
        }
        out
    }
}

/// Per-function-activation state: everything that resets when generation enters
/// a new function body and is discarded (after being read back by the caller)
/// when it returns.
#[derive(Debug, Default)]
struct Frame {
    /// Stack of scopes; index 0 is the function's top scope (depth 0).
    scopes: Vec<HashMap<String, String>>,
    /// Mangled name -> slot, accumulated across the whole function body so the
    /// generator can emit one WAT local declaration per slot in the header.
    locals: HashMap<String, LocalSlot>,
    locals_order: Vec<String>,
    const_vars: HashSet<String>,
    next_local_index: u32,
    /// Names resolved through the environment this function received as a
    /// parameter (it is itself a lifted closure body). Order is significant:
    /// it fixes each field's byte offset in `$_penv`.
    captured: Vec<(String, Kind)>,
    /// Names hoisted into this function's *own* environment because a nested
    /// closure captures them; reads/writes of these route through `$_env`, not
    /// a plain local. Order is significant: it fixes each field's offset.
    hoisted: Vec<(String, Kind)>,
    /// `(break_label, continue_label)` for each loop/switch currently open,
    /// innermost last; a switch contributes a break target but no continue
    /// target, so `continue` inside a case still reaches the enclosing loop.
    /// Kept on the context (per the design notes' warning against truly
    /// global state) rather than e.g. thread-local storage, so nested
    /// `compile()` calls never interfere with each other.
    loop_labels: Vec<(String, Option<String>)>,
    /// The name of the function currently being compiled in this frame, if any
    /// (anonymous arrow literals get their synthetic name here too) - lets a
    /// recursive self-reference reuse the running activation's own `$_penv`
    /// instead of trying to resolve its own not-yet-finished closure value.
    current_function_name: Option<String>,
}

pub struct Context {
    frames: Vec<Frame>,
    pub strings: StringInternTable,
    pub schemas: SchemaRegistry,
    pub globals: HashMap<String, GlobalDef>,
    pub global_order: Vec<String>,
    pub functions: HashMap<String, FunctionDef>,
    pub function_order: Vec<String>,
    pub closure_env_types: Vec<EnvShape>,
    pub static_arrays: Vec<StaticArray>,
    pub static_objects: Vec<StaticObject>,
    pub func_table: Vec<String>,
    pub regexes: Vec<RegexDef>,
    pub used: UsedFeatures,
    pub unique_id: u32,
    pub warnings: Vec<Warning>,
    heap_cursor: u32,
}

impl Context {
    pub fn new() -> Self {
        let mut ctx = Context {
            frames: Vec::new(),
            strings: StringInternTable::new(STRING_REGION_BASE),
            schemas: SchemaRegistry::new(),
            globals: HashMap::new(),
            global_order: Vec::new(),
            functions: HashMap::new(),
            function_order: Vec::new(),
            closure_env_types: Vec::new(),
            static_arrays: Vec::new(),
            static_objects: Vec::new(),
            func_table: Vec::new(),
            regexes: Vec::new(),
            used: UsedFeatures::default(),
            unique_id: 0,
            warnings: Vec::new(),
            heap_cursor: STATIC_REGION_BASE,
        };
        ctx.enter_function();
        ctx
    }

    // -- function/frame lifecycle -------------------------------------------------

    pub fn enter_function(&mut self) {
        self.frames.push(Frame::default());
        self.push_scope();
    }

    /// Pop the current frame, returning the locals declared within it (for the
    /// caller to emit as WAT local declarations) in declaration order.
    pub fn exit_function(&mut self) -> Vec<LocalSlot> {
        self.pop_scope();
        let frame = self.frames.pop().expect("exit_function without enter_function");
        frame
            .locals_order
            .into_iter()
            .map(|name| frame.locals.get(&name).cloned().unwrap())
            .collect()
    }

    fn frame(&self) -> &Frame {
        self.frames.last().expect("no active function frame")
    }

    fn frame_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("no active function frame")
    }

    pub fn current_depth(&self) -> u32 {
        self.frame().scopes.len() as u32 - 1
    }

    pub fn set_received_environment(&mut self, fields: &EnvShape) {
        self.frame_mut().captured = fields.0.clone();
    }

    pub fn hoist(&mut self, name: &str, kind: Kind) {
        let frame = self.frame_mut();
        if !frame.hoisted.iter().any(|(n, _)| n == name) {
            frame.hoisted.push((name.to_string(), kind));
        }
    }

    pub fn is_hoisted(&self, name: &str) -> bool {
        self.frame().hoisted.iter().any(|(n, _)| n == name)
    }

    pub fn hoisted_kind(&self, name: &str) -> Option<Kind> {
        self.frame().hoisted.iter().find(|(n, _)| n == name).map(|(_, k)| *k)
    }

    pub fn hoisted_field_index(&self, name: &str) -> Option<usize> {
        self.frame().hoisted.iter().position(|(n, _)| n == name)
    }

    /// The current function's own environment shape, as nested closures that
    /// share it (rather than copying) will receive it.
    pub fn hoisted_shape(&self) -> EnvShape {
        EnvShape(self.frame().hoisted.clone())
    }

    pub fn has_hoisted(&self) -> bool {
        !self.frame().hoisted.is_empty()
    }

    pub fn captured_kind(&self, name: &str) -> Option<Kind> {
        self.frame().captured.iter().find(|(n, _)| n == name).map(|(_, k)| *k)
    }

    pub fn received_field_index(&self, name: &str) -> Option<usize> {
        self.frame().captured.iter().position(|(n, _)| n == name)
    }

    /// The shape of the environment this function received, empty when it is
    /// not a lifted closure body.
    pub fn received_shape(&self) -> EnvShape {
        EnvShape(self.frame().captured.clone())
    }

    /// Every name the current function can see without going through a global
    /// or the function table: its own locals (all open scopes), its hoisted
    /// fields, and whatever it received from a parent closure. This is the
    /// `outer_defined` set handed to a nested function literal's free-variable
    /// analysis.
    pub fn visible_names(&self) -> HashSet<String> {
        let frame = self.frame();
        let mut names: HashSet<String> = frame.scopes.iter().flat_map(|s| s.keys().cloned()).collect();
        names.extend(frame.hoisted.iter().map(|(n, _)| n.clone()));
        names.extend(frame.captured.iter().map(|(n, _)| n.clone()));
        names
    }

    /// A free variable that turns out to be a plain local of the enclosing
    /// function must move into that function's own environment once a nested
    /// closure captures it - a value copied at closure-creation time would
    /// never observe later mutations the enclosing function makes to it.
    pub fn promote_to_hoisted(&mut self, name: &str, kind: Kind) {
        let frame = self.frame_mut();
        for scope in frame.scopes.iter_mut() {
            scope.remove(name);
        }
        if !frame.hoisted.iter().any(|(n, _)| n == name) {
            frame.hoisted.push((name.to_string(), kind));
        }
    }

    // -- loop/switch label stack ----------------------------------------------

    pub fn push_loop_labels(&mut self, break_label: impl Into<String>, continue_label: impl Into<String>) {
        self.frame_mut()
            .loop_labels
            .push((break_label.into(), Some(continue_label.into())));
    }

    /// A switch opens a break target only; `continue` inside its cases falls
    /// through to whatever loop encloses the switch.
    pub fn push_break_only_label(&mut self, break_label: impl Into<String>) {
        self.frame_mut().loop_labels.push((break_label.into(), None));
    }

    pub fn pop_loop_labels(&mut self) {
        self.frame_mut().loop_labels.pop();
    }

    pub fn break_label(&self) -> Option<&str> {
        self.frame().loop_labels.last().map(|(b, _)| b.as_str())
    }

    pub fn continue_label(&self) -> Option<&str> {
        self.frame()
            .loop_labels
            .iter()
            .rev()
            .find_map(|(_, c)| c.as_deref())
    }

    // -- block scoping --------------------------------------------------------

    pub fn push_scope(&mut self) {
        self.frame_mut().scopes.push(HashMap::new());
    }

    pub fn pop_scope(&mut self) {
        self.frame_mut().scopes.pop();
    }

    /// Declare a new local in the current (innermost) scope, mangling its name
    /// by block depth. Returns the mangled name the generator should emit.
    /// Redeclaring a name already declared at this depth gets a fresh slot
    /// (the new binding shadows the old one from here on).
    pub fn declare_var(&mut self, name: &str, kind: Kind, schema: Option<Schema>, is_const: bool) -> String {
        let depth = self.current_depth();
        let mut mangled = if depth == 0 {
            name.to_string()
        } else {
            format!("{name}_s{depth}")
        };
        while self.frame().locals.contains_key(&mangled) {
            mangled = format!("{mangled}_r{}", self.fresh_id());
        }

        let frame = self.frame_mut();
        let index = frame.next_local_index;
        frame.next_local_index += 1;
        frame.locals.insert(
            mangled.clone(),
            LocalSlot {
                index,
                kind,
                mangled: mangled.clone(),
                schema,
            },
        );
        frame.locals_order.push(mangled.clone());
        if is_const {
            frame.const_vars.insert(mangled.clone());
        }
        frame
            .scopes
            .last_mut()
            .expect("declare_var with no open scope")
            .insert(name.to_string(), mangled.clone());
        mangled
    }

    /// Declare a function parameter: resolvable like any local, but never
    /// emitted as a `(local ...)` declaration since the WAT function header
    /// already names it as a `(param ...)`.
    pub fn declare_param(&mut self, name: &str, kind: Kind) -> String {
        let mangled = name.to_string();
        let frame = self.frame_mut();
        let index = frame.next_local_index;
        frame.next_local_index += 1;
        frame.locals.insert(
            mangled.clone(),
            LocalSlot {
                index,
                kind,
                mangled: mangled.clone(),
                schema: None,
            },
        );
        frame
            .scopes
            .last_mut()
            .expect("declare_param with no open scope")
            .insert(name.to_string(), mangled.clone());
        mangled
    }

    pub fn set_current_function_name(&mut self, name: &str) {
        self.frame_mut().current_function_name = Some(name.to_string());
    }

    pub fn current_function_name(&self) -> Option<&str> {
        self.frame().current_function_name.as_deref()
    }

    pub fn is_const(&self, mangled: &str) -> bool {
        self.frame().const_vars.contains(mangled)
    }

    /// Resolution order: plain local (searching scopes innermost-out), then the
    /// function's own hoisted environment, then the received closure environment.
    /// Globals and reserved constants are tried by the caller after this returns
    /// `None`, per the generator's identifier resolution order.
    pub fn resolve(&self, name: &str) -> Option<Resolved> {
        let frame = self.frame();
        for scope in frame.scopes.iter().rev() {
            if let Some(mangled) = scope.get(name) {
                let slot = frame.locals.get(mangled).expect("scope entry without local slot");
                return Some(Resolved::Local(slot.clone()));
            }
        }
        if let Some(&(_, kind)) = frame.hoisted.iter().find(|(n, _)| n == name) {
            return Some(Resolved::OwnEnv(name.to_string(), kind));
        }
        if let Some(&(_, kind)) = frame.captured.iter().find(|(n, _)| n == name) {
            return Some(Resolved::ReceivedEnv(name.to_string(), kind));
        }
        None
    }

    // -- globals / functions / closures ---------------------------------------

    pub fn add_global(&mut self, name: &str, kind: Kind, init: impl Into<String>) {
        if !self.globals.contains_key(name) {
            self.global_order.push(name.to_string());
        }
        self.globals.insert(name.to_string(), GlobalDef { kind, init: init.into() });
    }

    pub fn register_function(&mut self, name: &str, def: FunctionDef) {
        if !self.functions.contains_key(name) {
            self.function_order.push(name.to_string());
        }
        self.functions.insert(name.to_string(), def);
    }

    /// Place a function in the indirect-call table (for first-class closure
    /// values) and return its index.
    pub fn add_to_func_table(&mut self, name: &str) -> u32 {
        if let Some(idx) = self.func_table.iter().position(|n| n == name) {
            return idx as u32;
        }
        self.func_table.push(name.to_string());
        (self.func_table.len() - 1) as u32
    }

    pub fn new_env_shape(&mut self, shape: EnvShape) -> u32 {
        let id = self.closure_env_types.len() as u32;
        self.closure_env_types.push(shape);
        id
    }

    // -- static data -----------------------------------------------------------

    fn bump_heap(&mut self, bytes: u32) -> u32 {
        let offset = self.heap_cursor;
        self.heap_cursor += (bytes + 7) & !7;
        offset
    }

    pub fn alloc_static_array(&mut self, elements: Vec<f64>) -> u32 {
        // 8-byte length header, then one f64 slot per element.
        let offset = self.bump_heap(8 + elements.len() as u32 * 8) + 8;
        self.static_arrays.push(StaticArray { offset, elements });
        offset
    }

    pub fn alloc_static_object(&mut self, schema_id: u32, elements: Vec<f64>) -> u32 {
        let offset = self.bump_heap(elements.len() as u32 * 8);
        self.static_objects.push(StaticObject {
            offset,
            schema_id,
            elements,
        });
        offset
    }

    /// First byte past all static array/object data: the runtime heap's start.
    pub fn static_end(&self) -> u32 {
        self.heap_cursor
    }

    /// Register a compiled regex, returning its index (the `N` in `$regex_N`).
    pub fn register_regex(&mut self, def: RegexDef) -> u32 {
        let id = self.regexes.len() as u32;
        self.used.regex_ids.push(id);
        self.regexes.push(def);
        id
    }

    // -- misc --------------------------------------------------------------------

    pub fn fresh_id(&mut self) -> u32 {
        self.unique_id += 1;
        self.unique_id
    }

    /// A fresh internal temporary, registered as a real local of the current
    /// function so it appears in the emitted WAT header. The `_` prefix
    /// bypasses scope mangling and can never collide with a user name.
    pub fn fresh_local(&mut self, hint: &str, kind: Kind) -> String {
        let name = format!("_{hint}{}", self.fresh_id());
        let frame = self.frame_mut();
        let index = frame.next_local_index;
        frame.next_local_index += 1;
        frame.locals.insert(
            name.clone(),
            LocalSlot {
                index,
                kind,
                mangled: name.clone(),
                schema: None,
            },
        );
        frame.locals_order.push(name.clone());
        name
    }

    pub fn fresh_label(&mut self, hint: &str) -> String {
        format!("${hint}{}", self.fresh_id())
    }

    pub fn warn(&mut self, code: ErrorCode, message: impl Into<String>) {
        self.warnings.push(Warning {
            code,
            message: message.into(),
        });
    }

    pub fn error(&self, code: ErrorCode, message: impl Into<String>) -> CompileError {
        CompileError::new(code, message)
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::new()
    }
}

#[derive(Debug, Clone)]
pub enum Resolved {
    Local(LocalSlot),
    OwnEnv(String, Kind),
    ReceivedEnv(String, Kind),
}

/// Reserved identifiers that resolve to a constant without involving a local,
/// global, or environment lookup at all.
pub fn reserved_constant(name: &str) -> Option<&'static str> {
    match name {
        "Infinity" => Some("(f64.const inf)"),
        "NaN" => Some("(f64.const nan)"),
        "Math.PI" => Some("(f64.const 3.141592653589793)"),
        "Math.E" => Some("(f64.const 2.718281828459045)"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_zero_locals_are_unmangled() {
        let mut ctx = Context::new();
        let mangled = ctx.declare_var("x", Kind::F64, None, false);
        assert_eq!(mangled, "x");
    }

    #[test]
    fn nested_scope_mangles_by_depth() {
        let mut ctx = Context::new();
        ctx.push_scope();
        let mangled = ctx.declare_var("x", Kind::F64, None, false);
        assert_eq!(mangled, "x_s1");
    }

    #[test]
    fn lookup_prefers_innermost_shadowing_declaration() {
        let mut ctx = Context::new();
        ctx.declare_var("x", Kind::F64, None, false);
        ctx.push_scope();
        ctx.declare_var("x", Kind::I32, None, false);
        match ctx.resolve("x").unwrap() {
            Resolved::Local(slot) => assert_eq!(slot.kind, Kind::I32),
            _ => panic!("expected a local"),
        }
        ctx.pop_scope();
        match ctx.resolve("x").unwrap() {
            Resolved::Local(slot) => assert_eq!(slot.kind, Kind::F64),
            _ => panic!("expected a local"),
        }
    }

    #[test]
    fn const_reassignment_is_detectable() {
        let mut ctx = Context::new();
        let mangled = ctx.declare_var("x", Kind::F64, None, true);
        assert!(ctx.is_const(&mangled));
    }

    #[test]
    fn exit_function_returns_locals_in_declaration_order() {
        let mut ctx = Context::new();
        ctx.declare_var("a", Kind::F64, None, false);
        ctx.declare_var("b", Kind::I32, None, false);
        ctx.enter_function();
        ctx.declare_var("c", Kind::F64, None, false);
        let inner = ctx.exit_function();
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].mangled, "c");
        let outer = ctx.exit_function();
        assert_eq!(outer.iter().map(|l| l.mangled.as_str()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn static_arrays_occupy_disjoint_offsets() {
        let mut ctx = Context::new();
        let a = ctx.alloc_static_array(vec![1.0, 2.0, 3.0]);
        let b = ctx.alloc_static_array(vec![4.0]);
        assert!(b >= a + 3 * 8);
    }

    #[test]
    fn schema_registry_never_reuses_an_id_for_a_different_shape() {
        let mut ctx = Context::new();
        let a = ctx.schemas.intern(vec!["x".into()]);
        let b = ctx.schemas.intern(vec!["x".into(), "y".into()]);
        assert_ne!(a, b);
    }
}
