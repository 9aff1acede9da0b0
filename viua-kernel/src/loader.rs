//! Resolves module names to bytecode segments or native symbol tables
//! (§4.7, §6).

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use viua_abi::{ModuleKind, MODULE_MAGIC, SEGMENT_SEPARATOR};

use crate::err::{KernelError, KernelResult};
use crate::frame::Frame;
use crate::kernel::Kernel;
use crate::process::Process;

/// All bytecode loaded into one kernel instance, plus the function-name to
/// code-offset map built up as modules are imported.
#[derive(Default)]
pub struct CodeSpace {
    code: Vec<u8>,
    functions: HashMap<String, u64>,
}

impl CodeSpace {
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn address_of(&self, function: &str) -> Option<u64> {
        self.functions.get(function).copied()
    }

    fn append(&mut self, symbols: Vec<(String, u64)>, segment: &[u8]) {
        let base = self.code.len() as u64;
        self.code.extend_from_slice(segment);
        for (name, offset) in symbols {
            self.functions.insert(name, base + offset);
        }
    }
}

/// A native call target: takes the prepared argument frame, the calling
/// process, and a handle back into the kernel (so a native function can
/// spawn, import, send, or register a prototype the same way bytecode
/// would), and produces either a return value or an exception. Stands in
/// for a real `dlopen`-resolved function pointer (see DESIGN.md, Open
/// Question O1).
pub type NativeFn = Arc<
    dyn Fn(&Frame, &mut Process, &Kernel) -> crate::err::RuntimeResult<crate::value::Value>
        + Send
        + Sync,
>;

/// A module implemented in-process rather than loaded from a shared object.
/// Its `exports` mirror the `{name, function-pointer}` table a real native
/// module would return from its `exports()` symbol.
pub struct NativeModule {
    pub name: String,
    pub exports: Vec<(String, NativeFn)>,
}

#[derive(Default)]
pub struct ForeignFunctionMap {
    functions: HashMap<String, NativeFn>,
}

impl ForeignFunctionMap {
    pub fn resolve(&self, name: &str) -> Option<NativeFn> {
        self.functions.get(name).cloned()
    }

    fn register(&mut self, name: String, f: NativeFn) {
        self.functions.insert(name, f);
    }
}

/// Parses and merges modules by name, guaranteeing at-most-once loading
/// (§4.7, §8 scenario 6).
pub struct Loader {
    search_path: Vec<PathBuf>,
    loaded: Mutex<std::collections::HashSet<String>>,
    native_modules: HashMap<String, NativeModule>,
}

impl Loader {
    pub fn new() -> Self {
        let mut search_path = vec![PathBuf::from(".")];
        if let Some(home) = std::env::var_os("HOME") {
            search_path.push(PathBuf::from(home).join(".local/lib/viua"));
        }
        search_path.push(PathBuf::from("/usr/local/lib/viua"));
        search_path.push(PathBuf::from("/usr/lib/viua"));
        if let Some(viuapath) = std::env::var_os("VIUAPATH") {
            for entry in std::env::split_paths(&viuapath) {
                search_path.push(entry);
            }
        }
        Self {
            search_path,
            loaded: Mutex::new(std::collections::HashSet::new()),
            native_modules: HashMap::new(),
        }
    }

    /// Registers a native module by name so that `import` can find it
    /// without touching the filesystem. Used in place of a real `dlopen`.
    pub fn register_native(&mut self, module: NativeModule) {
        self.native_modules.insert(module.name.clone(), module);
    }

    /// Adds a directory to the front of the search path, taking priority
    /// over the defaults.
    pub fn prepend_search_dir(&mut self, dir: PathBuf) {
        self.search_path.insert(0, dir);
    }

    fn find_on_disk(&self, name: &str) -> Option<PathBuf> {
        for dir in &self.search_path {
            let candidate = dir.join(name);
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    /// Imports `name` into `code` and `ffi`, doing nothing if it was
    /// already loaded.
    pub fn import(
        &self,
        name: &str,
        code: &mut CodeSpace,
        ffi: &mut ForeignFunctionMap,
    ) -> KernelResult<()> {
        {
            let mut loaded = self.loaded.lock().unwrap();
            if !loaded.insert(name.to_owned()) {
                return Ok(());
            }
        }

        if let Some(module) = self.native_modules.get(name) {
            for (symbol, f) in &module.exports {
                ffi.register(symbol.clone(), Arc::clone(f));
            }
            return Ok(());
        }

        let path = self.find_on_disk(name).ok_or_else(|| KernelError::ModuleIo {
            path: name.to_owned(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "module not found"),
        })?;
        let bytes = fs::read(&path).map_err(|source| KernelError::ModuleIo {
            path: path.display().to_string(),
            source,
        })?;
        let (symbols, segment) = parse_module(&path, &bytes)?;
        code.append(symbols, segment);
        Ok(())
    }
}

impl Default for Loader {
    fn default() -> Self {
        Self::new()
    }
}

type SymbolTable = Vec<(String, u64)>;

fn parse_module<'a>(path: &Path, bytes: &'a [u8]) -> KernelResult<(SymbolTable, &'a [u8])> {
    let fail = |reason: &str| KernelError::MalformedModule {
        path: path.display().to_string(),
        reason: reason.to_owned(),
    };

    if bytes.len() < 5 || bytes[0..4] != MODULE_MAGIC {
        return Err(fail("missing VIUA magic"));
    }
    let kind = ModuleKind::from_byte(bytes[4]).ok_or_else(|| fail("unknown module kind byte"))?;

    let mut cursor = 5usize;
    let mut symbols = Vec::new();
    loop {
        if cursor >= bytes.len() {
            return Err(fail("symbol table runs past end of file"));
        }
        if bytes[cursor] == SEGMENT_SEPARATOR {
            cursor += 1;
            break;
        }
        let name_end = bytes[cursor..]
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| fail("unterminated symbol name"))?
            + cursor;
        let name = std::str::from_utf8(&bytes[cursor..name_end])
            .map_err(|_| fail("symbol name is not UTF-8"))?
            .to_owned();
        cursor = name_end + 1;
        let offset_bytes: [u8; 8] = bytes
            .get(cursor..cursor + 8)
            .ok_or_else(|| fail("truncated symbol offset"))?
            .try_into()
            .unwrap();
        let offset = u64::from_le_bytes(offset_bytes);
        cursor += 8;
        symbols.push((name, offset));
    }

    if kind == ModuleKind::Executable && !symbols.iter().any(|(n, _)| n == viua_abi::ENTRY_SYMBOL) {
        return Err(KernelError::MissingEntryPoint(path.display().to_string()));
    }

    Ok((symbols, &bytes[cursor..]))
}
