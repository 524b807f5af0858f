//! Module loader: turns IR modules into ROM quads.
//!
//! [`load`] is generic over [`RomAccess`], so it can target any quad store.
//! [`Core::load_module`] runs it against a [`RomOverlay`] and commits the
//! buffered quads only when every validation pass succeeds, so a failed
//! load never changes ROM.
//!
//! # Passes
//!
//! 1. Placeholders: quad-shaped definitions get a ROM address; imported
//!    refs and plain values resolve immediately.
//! 2. Aliases: local refs resolve in increasing ref-depth order.
//! 3. Populate: every placeholder quad is written.
//! 4. Validate: type checks, cyclic data checks, arity checks.

use crate::info;
use crate::virtual_machine::any::*;
use crate::virtual_machine::errors::LoadError;
use crate::virtual_machine::ir::{builtin_type, Form, Imm, Module, Node};
use crate::virtual_machine::isa::{ImmKind, Op};
use crate::virtual_machine::quad::Quad;
use crate::virtual_machine::vm::Core;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

/// Exported name -> raw value.
pub type Exports = BTreeMap<String, Any>;

/// Quad store the loader allocates into.
pub trait RomAccess {
    /// Reserves a fresh ROM address.
    fn alloc_quad(&mut self) -> Result<Any, LoadError>;
    /// Reads a ROM quad, or `None` for non-ROM or unallocated addresses.
    fn read_quad(&self, ptr: Any) -> Option<Quad>;
    fn write_quad(&mut self, ptr: Any, quad: Quad);
}

/// Buffers ROM allocations above the core's current ROM top.
///
/// Reads below the top go to the core; everything the loader allocates
/// lives in the buffer until [`RomOverlay::into_writes`].
pub struct RomOverlay<'a> {
    core: &'a Core,
    base: usize,
    limit: usize,
    writes: Vec<Quad>,
}

impl<'a> RomOverlay<'a> {
    pub fn new(core: &'a Core) -> Self {
        Self {
            core,
            base: core.rom_top(),
            limit: core.rom_capacity(),
            writes: Vec::new(),
        }
    }

    /// Consumes the overlay and returns the buffered quads in address order.
    pub fn into_writes(self) -> Vec<Quad> {
        self.writes
    }
}

impl RomAccess for RomOverlay<'_> {
    fn alloc_quad(&mut self) -> Result<Any, LoadError> {
        let ofs = self.base + self.writes.len();
        if ofs >= self.limit {
            return Err(LoadError::RomFull);
        }
        self.writes.push(Quad::empty());
        Ok(Any::rom(ofs))
    }

    fn read_quad(&self, ptr: Any) -> Option<Quad> {
        if !ptr.is_rom() {
            return None;
        }
        match ptr.ofs().checked_sub(self.base) {
            Some(idx) => self.writes.get(idx).copied(),
            None => self.core.read_quad(ptr).ok(),
        }
    }

    fn write_quad(&mut self, ptr: Any, quad: Quad) {
        if let Some(slot) = ptr
            .ofs()
            .checked_sub(self.base)
            .and_then(|idx| self.writes.get_mut(idx))
        {
            *slot = quad;
        }
    }
}

#[derive(Copy, Clone, Debug)]
enum Link {
    PairTail,
    DictNext,
}

impl Link {
    fn follow(self, quad: &Quad) -> Option<Any> {
        match self {
            Link::PairTail if quad.t == PAIR_T => Some(quad.y),
            Link::DictNext if quad.t == DICT_T => Some(quad.z),
            _ => None,
        }
    }
}

struct TypeCheck {
    raw: Any,
    t: Any,
    expected: &'static str,
    context: String,
}

struct Loader<'m, R: RomAccess> {
    module: &'m Module,
    imports: &'m BTreeMap<String, Exports>,
    rom: &'m mut R,
    definitions: BTreeMap<&'m str, Any>,
    /// Definition being populated, for error messages.
    current: &'m str,
    type_checks: Vec<TypeCheck>,
    cyclic_checks: Vec<(Any, Link, String)>,
    arity_checks: Vec<(Any, i32, String)>,
}

/// Loads `module` into `rom`, resolving its imports from `imports`
/// (alias -> exports of the imported module).
pub fn load<R: RomAccess>(
    module: &Module,
    imports: &BTreeMap<String, Exports>,
    rom: &mut R,
) -> Result<Exports, LoadError> {
    let mut loader = Loader {
        module,
        imports,
        rom,
        definitions: BTreeMap::new(),
        current: "",
        type_checks: Vec::new(),
        cyclic_checks: Vec::new(),
        arity_checks: Vec::new(),
    };
    loader.placeholders()?;
    loader.aliases()?;
    loader.populate_all()?;
    loader.check_types()?;
    loader.check_cycles()?;
    loader.check_arities()?;
    loader.exports()
}

impl<'m, R: RomAccess> Loader<'m, R> {
    fn context(&self, node: &Node) -> String {
        match node.debug() {
            Some(debug) => format!("{} at {}", self.current, debug),
            None => self.current.to_string(),
        }
    }

    fn placeholders(&mut self) -> Result<(), LoadError> {
        let module = self.module;
        for (name, node) in &module.define {
            self.current = name;
            if node.is_quad() {
                let ptr = self.rom.alloc_quad()?;
                self.definitions.insert(name, ptr);
            } else if node.local_alias().is_none() {
                let raw = self.value(node)?;
                self.definitions.insert(name, raw);
            }
        }
        Ok(())
    }

    /// Number of alias hops from `name` to a non-alias definition.
    fn ref_depth(&self, name: &'m str) -> Result<usize, LoadError> {
        let module: &'m Module = self.module;
        let define = &module.define;
        let mut seen = BTreeSet::new();
        let mut at = name;
        let mut depth = 0;
        while let Some(next) = define.get(at).and_then(Node::local_alias) {
            if !seen.insert(at) {
                return Err(LoadError::CyclicRefs(name.to_string()));
            }
            if define.get(next).and_then(Node::local_alias).is_none() {
                break;
            }
            depth += 1;
            at = next;
        }
        Ok(depth)
    }

    fn aliases(&mut self) -> Result<(), LoadError> {
        let module = self.module;
        let mut pending = Vec::new();
        for (name, node) in &module.define {
            if let Some(target) = node.local_alias() {
                pending.push((self.ref_depth(name)?, name.as_str(), target));
            }
        }
        pending.sort();
        for (_, name, target) in pending {
            self.current = name;
            let raw = self.definition(target)?;
            self.definitions.insert(name, raw);
        }
        Ok(())
    }

    fn populate_all(&mut self) -> Result<(), LoadError> {
        let module = self.module;
        for (name, node) in &module.define {
            if node.is_quad() {
                self.current = name;
                let ptr = self.definition(name)?;
                self.populate(ptr, node)?;
            }
        }
        Ok(())
    }

    fn definition(&self, name: &str) -> Result<Any, LoadError> {
        self.definitions
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::UndefinedSymbol(name.to_string()))
    }

    fn lookup(&self, module: Option<&str>, name: &str) -> Result<Any, LoadError> {
        let Some(module) = module else {
            return self.definition(name);
        };
        let exports = self
            .imports
            .get(module)
            .ok_or_else(|| LoadError::NotImported(module.to_string()))?;
        exports
            .get(name)
            .copied()
            .ok_or_else(|| LoadError::NotExported {
                module: module.to_string(),
                name: name.to_string(),
            })
    }

    fn fix(&self, node: &Node) -> Result<Any, LoadError> {
        match node {
            Node::Fixnum(n) => self.fixnum(*n, node),
            _ => Err(LoadError::NotAFixnum(self.context(node))),
        }
    }

    fn fixnum(&self, n: i64, node: &Node) -> Result<Any, LoadError> {
        i32::try_from(n)
            .ok()
            .filter(|n| (FIX_MIN..=FIX_MAX).contains(n))
            .map(Any::fix)
            .ok_or_else(|| LoadError::NotAFixnum(format!("{}: {}", self.context(node), n)))
    }

    fn value(&mut self, node: &Node) -> Result<Any, LoadError> {
        let Node::Object(obj) = node else {
            return self.fix(node);
        };
        match &obj.form {
            Form::Literal { value } => match value.as_str() {
                "undef" => Ok(UNDEF),
                "nil" => Ok(NIL),
                "false" => Ok(FALSE),
                "true" => Ok(TRUE),
                _ => Err(LoadError::NotALiteral(format!(
                    "{}: {}",
                    self.context(node),
                    value
                ))),
            },
            Form::Ref { module, name } => self.lookup(module.as_deref(), name),
            Form::Type {
                module,
                name,
                arity,
            } => match (name, arity) {
                (_, Some(_)) => {
                    let ptr = self.rom.alloc_quad()?;
                    self.populate(ptr, node)
                }
                (Some(name), None) => match builtin_type(name) {
                    Some(raw) if module.is_none() => Ok(raw),
                    _ => self.lookup(module.as_deref(), name),
                },
                (None, None) => Err(LoadError::NotAType(self.context(node))),
            },
            Form::Pair { .. } | Form::Dict { .. } | Form::Quad { .. } | Form::Instr { .. } => {
                let ptr = self.rom.alloc_quad()?;
                self.populate(ptr, node)
            }
            Form::Symbol { name } => Err(LoadError::NotAValue(format!(
                "{}: symbol {}",
                self.context(node),
                name
            ))),
        }
    }

    fn expect_type(&mut self, raw: Any, t: Any, expected: &'static str, node: &Node) {
        let context = self.context(node);
        self.type_checks.push(TypeCheck {
            raw,
            t,
            expected,
            context,
        });
    }

    fn instruction(&mut self, node: &Node) -> Result<Any, LoadError> {
        let raw = self.value(node)?;
        self.expect_type(raw, INSTR_T, "an instruction", node);
        Ok(raw)
    }

    /// Records a chain check when `node` links to a local definition.
    fn expect_acyclic(&mut self, raw: Any, link: Link, node: &Node) {
        if matches!(node.form(), Some(Form::Ref { module: None, .. })) {
            let context = self.context(node);
            self.cyclic_checks.push((raw, link, context));
        }
    }

    fn required<'n>(&self, field: Option<&'n Node>, what: &str, op: &str) -> Result<&'n Node, LoadError> {
        field.ok_or_else(|| LoadError::NotAValue(format!("{}: {} without {}", self.current, op, what)))
    }

    fn populate(&mut self, ptr: Any, node: &Node) -> Result<Any, LoadError> {
        let Some(form) = node.form() else {
            return Err(LoadError::NotAValue(self.context(node)));
        };
        let quad = match form {
            Form::Type { arity: Some(n), .. } => Quad::type_t(self.fixnum(*n, node)?),
            Form::Pair { head, tail } => {
                let car = self.value(head)?;
                let cdr = self.value(tail)?;
                self.expect_acyclic(cdr, Link::PairTail, tail);
                Quad::pair_t(car, cdr)
            }
            Form::Dict { key, value, next } => {
                let key = self.value(key)?;
                let value = self.value(value)?;
                let rest = self.value(next)?;
                if rest != NIL {
                    self.expect_type(rest, DICT_T, "a dict", next);
                }
                self.expect_acyclic(rest, Link::DictNext, next);
                Quad::dict_t(key, value, rest)
            }
            Form::Quad { t, x, y, z } => {
                let mut quad = Quad::new(self.value(t)?, UNDEF, UNDEF, UNDEF);
                let mut arity = 0;
                if let Some(x) = x {
                    quad.x = self.value(x)?;
                    arity = 1;
                }
                if let Some(y) = y {
                    quad.y = self.value(y)?;
                    arity = 2;
                }
                if let Some(z) = z {
                    quad.z = self.value(z)?;
                    arity = 3;
                }
                let context = self.context(t);
                self.arity_checks.push((quad.t, arity, context));
                quad
            }
            Form::Instr { op, imm, k, t, f } => {
                self.instr(op, imm.as_ref(), k.as_ref(), t.as_ref(), f.as_ref(), node)?
            }
            _ => return Err(LoadError::NotAValue(self.context(node))),
        };
        self.rom.write_quad(ptr, quad);
        Ok(ptr)
    }

    fn instr(
        &mut self,
        mnemonic: &str,
        imm: Option<&Imm>,
        k: Option<&Node>,
        t: Option<&Node>,
        f: Option<&Node>,
        node: &Node,
    ) -> Result<Quad, LoadError> {
        let op = Op::from_mnemonic(mnemonic)
            .ok_or_else(|| LoadError::NotAnOp(format!("{}: {}", self.context(node), mnemonic)))?;
        let imm_node = match imm {
            Some(Imm::Node(n)) => Some(n),
            _ => None,
        };
        let mut quad = Quad::instr_t(op.to_any(), UNDEF, UNDEF);
        match op.imm_kind() {
            ImmKind::None => {}
            ImmKind::Value => {
                let v = self.required(imm_node, "an immediate", mnemonic)?;
                quad.y = self.value(v)?;
            }
            ImmKind::Type => {
                let v = self.required(imm_node, "a type", mnemonic)?;
                quad.y = self.value(v)?;
                self.expect_type(quad.y, TYPE_T, "a type", v);
            }
            ImmKind::Fix => {
                let v = self.required(imm_node, "a count", mnemonic)?;
                quad.y = self.fix(v)?;
            }
            ImmKind::Label => {
                let label = match imm {
                    Some(Imm::Label(label)) => label.as_str(),
                    _ => "",
                };
                quad.y = op.label_code(label).ok_or_else(|| LoadError::BadLabel {
                    op: mnemonic.to_string(),
                    label: label.to_string(),
                })?;
            }
            ImmKind::Branch => {
                let t = self.required(t, "a true branch", mnemonic)?;
                quad.y = self.instruction(t)?;
                let f = self.required(f, "a false branch", mnemonic)?;
                quad.z = self.instruction(f)?;
                return Ok(quad);
            }
        }
        // `jump` takes its continuation from the stack and `end` has none.
        if op.has_next() && op != Op::Jump {
            let k = self.required(k, "a continuation", mnemonic)?;
            quad.z = self.instruction(k)?;
        }
        Ok(quad)
    }

    fn check_types(&self) -> Result<(), LoadError> {
        for check in &self.type_checks {
            let ok = check.raw.is_ptr()
                && self
                    .rom
                    .read_quad(check.raw)
                    .is_some_and(|quad| quad.t == check.t);
            if !ok {
                return Err(LoadError::TypeMismatch {
                    name: check.context.clone(),
                    expected: check.expected,
                });
            }
        }
        Ok(())
    }

    fn check_cycles(&self) -> Result<(), LoadError> {
        for (raw, link, context) in &self.cyclic_checks {
            let mut seen = BTreeSet::new();
            let mut at = *raw;
            while let Some(quad) = self.rom.read_quad(at) {
                if !seen.insert(at) {
                    return Err(LoadError::CyclicData(context.clone()));
                }
                match link.follow(&quad) {
                    Some(next) => at = next,
                    None => break,
                }
            }
        }
        Ok(())
    }

    fn check_arities(&self) -> Result<(), LoadError> {
        for (t, actual, context) in &self.arity_checks {
            if t.is_reserved_type() {
                return Err(LoadError::NotAType(context.clone()));
            }
            let arity = self
                .rom
                .read_quad(*t)
                .filter(|quad| quad.t == TYPE_T)
                .and_then(|quad| quad.x.fix_num())
                .ok_or_else(|| LoadError::NotAType(context.clone()))?;
            if arity != *actual {
                return Err(LoadError::BadArity {
                    name: context.clone(),
                    expected: arity,
                    actual: *actual,
                });
            }
        }
        Ok(())
    }

    fn exports(&self) -> Result<Exports, LoadError> {
        let mut exports = Exports::new();
        for name in &self.module.export {
            exports.insert(name.clone(), self.definition(name)?);
        }
        Ok(exports)
    }
}

impl Core {
    /// Loads one module. ROM is only written when the whole module loads.
    pub fn load_module(
        &mut self,
        module: &Module,
        imports: &BTreeMap<String, Exports>,
    ) -> Result<Exports, LoadError> {
        let mut overlay = RomOverlay::new(self);
        let exports = load(module, imports, &mut overlay)?;
        let writes = overlay.into_writes();
        let count = writes.len();
        for quad in writes {
            let ptr = self.reserve_rom().map_err(|_| LoadError::RomFull)?;
            self.write_rom(ptr, quad).map_err(|_| LoadError::RomFull)?;
        }
        info!(
            "loaded {} definitions into {} ROM quads (rom_top={})",
            module.define.len(),
            count,
            self.rom_top()
        );
        Ok(exports)
    }
}

// =========================
// Module graphs
// =========================

/// Locates and parses modules by source name.
pub trait Resolver {
    /// Canonical source of `specifier` as imported by `from`.
    fn canonical(&self, from: Option<&str>, specifier: &str) -> String;
    fn fetch(&mut self, src: &str) -> Result<Module, LoadError>;
}

/// Resolves modules as JSON files; relative specifiers are joined to the
/// importing module's directory.
#[derive(Debug, Default)]
pub struct FileResolver;

impl Resolver for FileResolver {
    fn canonical(&self, from: Option<&str>, specifier: &str) -> String {
        let dir = from.and_then(|src| Path::new(src).parent());
        let path = match dir {
            Some(dir) if specifier.starts_with('.') => dir.join(specifier),
            _ => PathBuf::from(specifier),
        };
        normalize(&path).to_string_lossy().into_owned()
    }

    fn fetch(&mut self, src: &str) -> Result<Module, LoadError> {
        let text = std::fs::read_to_string(src).map_err(|e| LoadError::Unresolved {
            src: src.to_string(),
            reason: e.to_string(),
        })?;
        Module::from_json(&text)
    }
}

/// Lexically removes `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    use std::path::Component;
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Loads `src` and everything it imports, depth first. Modules already in
/// `loaded` are reused; an import that leads back to a module still being
/// loaded fails with [`LoadError::ImportCycle`].
pub fn import<R: Resolver>(
    core: &mut Core,
    resolver: &mut R,
    loaded: &mut BTreeMap<String, Exports>,
    src: &str,
) -> Result<Exports, LoadError> {
    let src = resolver.canonical(None, src);
    let mut stack = Vec::new();
    import_inner(core, resolver, loaded, &mut stack, src)
}

fn import_inner<R: Resolver>(
    core: &mut Core,
    resolver: &mut R,
    loaded: &mut BTreeMap<String, Exports>,
    stack: &mut Vec<String>,
    src: String,
) -> Result<Exports, LoadError> {
    if let Some(exports) = loaded.get(&src) {
        return Ok(exports.clone());
    }
    if stack.contains(&src) {
        return Err(LoadError::ImportCycle(src));
    }
    let module = resolver.fetch(&src)?;
    stack.push(src.clone());
    let mut imports = BTreeMap::new();
    for (alias, specifier) in &module.import {
        let dep = resolver.canonical(Some(&src), specifier);
        let exports = import_inner(core, resolver, loaded, stack, dep)?;
        imports.insert(alias.clone(), exports);
    }
    stack.pop();
    let exports = core.load_module(&module, &imports)?;
    loaded.insert(src, exports.clone());
    Ok(exports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::config::CoreConfig;
    use serde_json::{json, Value};

    fn core() -> Core {
        Core::new(CoreConfig::default()).unwrap()
    }

    fn module(value: Value) -> Module {
        Module::from_value(value).unwrap()
    }

    fn load_one(core: &mut Core, value: Value) -> Result<Exports, LoadError> {
        core.load_module(&module(value), &BTreeMap::new())
    }

    #[test]
    fn loads_instruction_chain() {
        let mut core = core();
        let exports = load_one(
            &mut core,
            json!({
                "define": {
                    "done": { "kind": "instr", "op": "end", "imm": "commit" },
                    "beh": {
                        "kind": "instr", "op": "push", "imm": 42,
                        "k": { "kind": "ref", "name": "done" }
                    },
                    "answer": 42
                },
                "export": ["beh", "answer"]
            }),
        )
        .unwrap();

        assert_eq!(exports["answer"], Any::fix(42));
        let beh = exports["beh"];
        let quad = core.read_quad(beh).unwrap();
        assert_eq!(quad.t, INSTR_T);
        assert_eq!(quad.x, Op::Push.to_any());
        assert_eq!(quad.y, Any::fix(42));
        let done = core.read_quad(quad.z).unwrap();
        assert_eq!(done, Quad::instr_t(Op::End.to_any(), PLUS_1, UNDEF));
        assert_eq!(core.rom_top(), ROM_BASE_OFS + 2);
    }

    #[test]
    fn cyclic_pair_tail_writes_no_rom() {
        let mut core = core();
        let err = load_one(
            &mut core,
            json!({
                "define": {
                    "loop": {
                        "kind": "pair", "head": 1,
                        "tail": { "kind": "ref", "name": "loop" }
                    }
                },
                "export": ["loop"]
            }),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::CyclicData(_)), "{err}");
        assert_eq!(core.rom_top(), ROM_BASE_OFS);
    }

    #[test]
    fn missing_import_export_is_reported() {
        let mut core = core();
        let lib = load_one(&mut core, json!({ "define": { "x": 1 }, "export": ["x"] })).unwrap();
        let imports = BTreeMap::from([("lib".to_string(), lib)]);
        let err = core
            .load_module(
                &module(json!({
                    "define": { "y": { "kind": "ref", "module": "lib", "name": "nope" } },
                    "export": ["y"]
                })),
                &imports,
            )
            .unwrap_err();
        assert_eq!(
            err,
            LoadError::NotExported {
                module: "lib".into(),
                name: "nope".into()
            }
        );
        let err = core
            .load_module(
                &module(json!({ "define": { "y": { "kind": "ref", "module": "std", "name": "x" } } })),
                &imports,
            )
            .unwrap_err();
        assert_eq!(err, LoadError::NotImported("std".into()));
    }

    #[test]
    fn alias_chains_resolve_and_cycles_fail() {
        let mut core = core();
        let exports = load_one(
            &mut core,
            json!({
                "define": {
                    "a": { "kind": "ref", "name": "b" },
                    "b": { "kind": "ref", "name": "c" },
                    "c": 7
                },
                "export": ["a"]
            }),
        )
        .unwrap();
        assert_eq!(exports["a"], Any::fix(7));

        let err = load_one(
            &mut core,
            json!({
                "define": {
                    "a": { "kind": "ref", "name": "b" },
                    "b": { "kind": "ref", "name": "a" }
                }
            }),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::CyclicRefs(_)));

        let err = load_one(&mut core, json!({ "define": { "a": { "kind": "ref", "name": "zz" } } }))
            .unwrap_err();
        assert_eq!(err, LoadError::UndefinedSymbol("zz".into()));
    }

    #[test]
    fn bad_labels_and_ops() {
        let mut core = core();
        let err = load_one(
            &mut core,
            json!({ "define": { "x": { "kind": "instr", "op": "end", "imm": "finish" } } }),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LoadError::BadLabel {
                op: "end".into(),
                label: "finish".into()
            }
        );
        let err = load_one(&mut core, json!({ "define": { "x": { "kind": "instr", "op": "halt" } } }))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotAnOp(_)));
        assert_eq!(core.rom_top(), ROM_BASE_OFS);
    }

    #[test]
    fn continuation_must_be_an_instruction() {
        let mut core = core();
        let err = load_one(
            &mut core,
            json!({
                "define": {
                    "x": { "kind": "instr", "op": "push", "imm": 1, "k": 5 }
                }
            }),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::TypeMismatch { expected: "an instruction", .. }));
    }

    #[test]
    fn custom_quads_check_arity() {
        let mut core = core();
        let exports = load_one(
            &mut core,
            json!({
                "define": {
                    "point_t": { "kind": "type", "arity": 2 },
                    "origin": {
                        "kind": "quad", "t": { "kind": "type", "name": "point_t" },
                        "x": 0, "y": 0
                    }
                },
                "export": ["origin"]
            }),
        )
        .unwrap();
        let origin = core.read_quad(exports["origin"]).unwrap();
        assert_eq!(origin.x, ZERO);
        assert_eq!(core.read_quad(origin.t).unwrap(), Quad::type_t(PLUS_2));

        let err = load_one(
            &mut core,
            json!({
                "define": {
                    "bad": { "kind": "quad", "t": { "kind": "type", "arity": 2 }, "x": 1 }
                }
            }),
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::BadArity { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn builtin_core_types_cannot_be_built() {
        let mut core = core();
        for name in ["proxy", "actor", "stub", "fixnum"] {
            let err = load_one(
                &mut core,
                json!({
                    "define": {
                        "forged": {
                            "kind": "quad", "t": { "kind": "type", "name": name },
                            "x": 1, "y": 999
                        }
                    }
                }),
            )
            .unwrap_err();
            assert!(matches!(err, LoadError::NotAType(_)), "{name}: {err}");
        }
        assert_eq!(core.rom_top(), ROM_BASE_OFS);

        let exports = load_one(
            &mut core,
            json!({
                "define": { "p": { "kind": "quad", "t": { "kind": "type", "name": "pair" }, "x": 1, "y": 2 } },
                "export": ["p"]
            }),
        )
        .unwrap();
        assert_eq!(core.read_quad(exports["p"]).unwrap(), Quad::pair_t(PLUS_1, PLUS_2));
    }

    #[test]
    fn symbols_and_wide_fixnums_are_rejected() {
        let mut core = core();
        let err = load_one(&mut core, json!({ "define": { "s": { "kind": "symbol", "name": "x" } } }))
            .unwrap_err();
        assert!(matches!(err, LoadError::NotAValue(_)));
        let wide = 1_i64 << 31;
        let err = load_one(&mut core, json!({ "define": { "n": wide } })).unwrap_err();
        assert!(matches!(err, LoadError::NotAFixnum(_)));
    }

    #[test]
    fn overlay_reports_rom_full() {
        let mut core = Core::new(CoreConfig::default().with_rom_max(ROM_BASE_OFS + 1)).unwrap();
        let err = load_one(
            &mut core,
            json!({
                "define": {
                    "a": { "kind": "pair", "head": 1, "tail": 2 },
                    "b": { "kind": "pair", "head": 3, "tail": 4 }
                }
            }),
        )
        .unwrap_err();
        assert_eq!(err, LoadError::RomFull);
        assert_eq!(core.rom_top(), ROM_BASE_OFS);
    }

    struct MapResolver {
        modules: BTreeMap<String, Value>,
        fetched: Vec<String>,
    }

    impl Resolver for MapResolver {
        fn canonical(&self, _from: Option<&str>, specifier: &str) -> String {
            specifier.to_string()
        }

        fn fetch(&mut self, src: &str) -> Result<Module, LoadError> {
            self.fetched.push(src.to_string());
            let value = self.modules.get(src).cloned().ok_or_else(|| LoadError::Unresolved {
                src: src.to_string(),
                reason: "missing".into(),
            })?;
            Module::from_value(value)
        }
    }

    #[test]
    fn import_graph_is_memoized() {
        let mut core = core();
        let mut resolver = MapResolver {
            modules: BTreeMap::from([
                ("lib".to_string(), json!({ "define": { "one": 1 }, "export": ["one"] })),
                (
                    "mid".to_string(),
                    json!({
                        "import": { "l": "lib" },
                        "define": { "one": { "kind": "ref", "module": "l", "name": "one" } },
                        "export": ["one"]
                    }),
                ),
                (
                    "main".to_string(),
                    json!({
                        "import": { "l": "lib", "m": "mid" },
                        "define": { "pair": {
                            "kind": "pair",
                            "head": { "kind": "ref", "module": "l", "name": "one" },
                            "tail": { "kind": "ref", "module": "m", "name": "one" }
                        } },
                        "export": ["pair"]
                    }),
                ),
            ]),
            fetched: Vec::new(),
        };
        let mut loaded = BTreeMap::new();
        let exports = import(&mut core, &mut resolver, &mut loaded, "main").unwrap();
        assert_eq!(resolver.fetched, ["main", "lib", "mid"]);
        let pair = core.read_quad(exports["pair"]).unwrap();
        assert_eq!(pair, Quad::pair_t(PLUS_1, PLUS_1));
    }

    #[test]
    fn import_cycles_fail() {
        let mut core = core();
        let mut resolver = MapResolver {
            modules: BTreeMap::from([
                ("a".to_string(), json!({ "import": { "b": "b" } })),
                ("b".to_string(), json!({ "import": { "a": "a" } })),
            ]),
            fetched: Vec::new(),
        };
        let err = import(&mut core, &mut resolver, &mut BTreeMap::new(), "a").unwrap_err();
        assert_eq!(err, LoadError::ImportCycle("a".into()));
    }

    #[test]
    fn file_resolver_joins_relative_paths() {
        let resolver = FileResolver;
        assert_eq!(
            resolver.canonical(Some("lib/app/main.json"), "../std/list.json"),
            "lib/std/list.json"
        );
        assert_eq!(resolver.canonical(Some("lib/main.json"), "/abs.json"), "/abs.json");
    }
}
