//! Script Loader
//!
//! Compiles source or bytecode into the interpreter and runs it through the
//! safety net, or parks it in `package.preload` so that a later
//! `require(name)` runs it.

use std::fs;
use std::os::raw::c_char;
use std::path::Path;

use mlua_sys as ffi;
use tracing::{debug, trace};

use super::errors::{BridgeError, BridgeResult};
use super::protect::Returns;
use super::stack::{Value, ValueType};
use super::Context;

impl Context {
    /// Compile `chunk` and push it as a function without running it.
    pub fn load_buffer(
        &self,
        chunk: &[u8],
        chunkname: &str,
    ) -> BridgeResult<()> {
        let name = std::ffi::CString::new(chunkname)
            .map_err(|_| BridgeError::InteriorNul(chunkname.to_string()))?;
        self.check_stack(1)?;
        let status = unsafe {
            ffi::luaL_loadbufferx(
                self.state(),
                chunk.as_ptr() as *const c_char,
                chunk.len(),
                name.as_ptr(),
                self.config.chunk_mode.as_cstr().as_ptr(),
            )
        };
        if status != ffi::LUA_OK {
            let err = self.take_error(status);
            debug!(chunk = chunkname, %err, "failed to load chunk");
            return Err(self.fault(err));
        }
        trace!(chunk = chunkname, bytes = chunk.len(), "loaded chunk");
        Ok(())
    }

    /// Load and run `chunk`, leaving all of its results on the stack.
    /// Returns how many results it produced.
    pub fn exec_buffer(
        &self,
        chunk: &[u8],
        chunkname: &str,
    ) -> BridgeResult<i32> {
        let base = self.top();
        self.load_buffer(chunk, chunkname)?;
        self.call_protected(0, Returns::All)?;
        Ok(self.top() - base)
    }

    /// Run source text; the chunk is named after the source, as
    /// `luaL_loadstring` does. A chunk name ends at the first NUL byte.
    pub fn exec_string(
        &self,
        source: &str,
    ) -> BridgeResult<i32> {
        let chunkname = source.split('\0').next().unwrap_or_default();
        self.exec_buffer(source.as_bytes(), chunkname)
    }

    pub fn exec_file(
        &self,
        path: impl AsRef<Path>,
    ) -> BridgeResult<i32> {
        let path = path.as_ref();
        let chunk = self.read_chunk(path)?;
        self.exec_buffer(&chunk, &format!("@{}", path.display()))
    }

    /// Run source text and collect its results, leaving the stack as it was.
    pub fn eval(
        &self,
        source: &str,
    ) -> BridgeResult<Vec<Value>> {
        let base = self.top();
        let count = self.exec_string(source)?;
        let values = (base + 1..=base + count).map(|idx| self.value_at(idx)).collect();
        self.set_top(base);
        Ok(values)
    }

    /// Install `chunk`, unexecuted, as `package.preload[name]`.
    ///
    /// The chunk is compiled before the table is touched, so a malformed
    /// chunk never leaves an entry behind.
    pub fn preload_module(
        &self,
        name: &str,
        chunk: &[u8],
    ) -> BridgeResult<()> {
        let top = self.top();
        self.load_buffer(chunk, &format!("={}", name))?;
        let installed = self.install_preload(name);
        self.set_top(top);
        installed?;
        debug!(module = name, "preloaded module");
        Ok(())
    }

    pub fn preload_module_file(
        &self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> BridgeResult<()> {
        let chunk = self.read_chunk(path.as_ref())?;
        self.preload_module(name, &chunk)
    }

    /// `require(module)` under the safety net and push its field `name`,
    /// which must be a function. The module table is not left behind.
    pub fn require_function(
        &self,
        module: &str,
        name: &str,
    ) -> BridgeResult<()> {
        let top = self.top();
        let pushed = self.push_module_function(module, name);
        if pushed.is_err() {
            self.set_top(top);
        }
        pushed
    }

    fn push_module_function(
        &self,
        module: &str,
        name: &str,
    ) -> BridgeResult<()> {
        if self.get_global("require")? != ValueType::Function {
            return Err(self.fault(BridgeError::MissingPackageLibrary));
        }
        self.push_string(module);
        self.call_protected(1, Returns::Count(1))?;
        if self.type_of(-1) != ValueType::Table {
            return Err(self.fault(BridgeError::ModuleNotTable {
                module: module.to_string(),
                found: self.type_of(-1),
            }));
        }
        if self.get_field(-1, name)? != ValueType::Function {
            return Err(self.fault(BridgeError::MissingFunction {
                module: module.to_string(),
                name: name.to_string(),
            }));
        }
        // [module fn] -> [fn]
        self.remove(-2);
        trace!(module = module, function = name, "resolved module function");
        Ok(())
    }

    /// Expects the compiled chunk on top of the stack.
    fn install_preload(
        &self,
        name: &str,
    ) -> BridgeResult<()> {
        if self.get_global("package")? != ValueType::Table {
            return Err(BridgeError::MissingPackageLibrary);
        }
        if self.get_field(-1, "preload")? != ValueType::Table {
            return Err(BridgeError::MissingPackageLibrary);
        }
        // [chunk package preload] -> preload[name] = chunk
        self.push_copy(-3);
        self.set_field(-2, name)
    }

    fn read_chunk(
        &self,
        path: &Path,
    ) -> BridgeResult<Vec<u8>> {
        fs::read(path).map_err(|source| {
            self.fault(BridgeError::Io {
                path: path.to_path_buf(),
                source,
            })
        })
    }
}
