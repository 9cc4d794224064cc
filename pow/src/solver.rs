//! Puzzle execution against the upstream's WASM artifact.
//!
//! The artifact is a wasm-bindgen build whose relevant exports are the
//! linear memory, a stack-pointer shift, an allocator, and the solve entry
//! point. Everything about that ABI stays inside [`WasmSolver`]; callers
//! only ever see `solve(challenge) -> nonce?`.

use std::path::Path;

use wasmtime::{Engine, Instance, Linker, Memory, Module, Store, TypedFunc};

use dragoman_types::Challenge;

/// The one puzzle algorithm the upstream currently issues.
pub const SUPPORTED_ALGORITHM: &str = "DeepSeekHashV1";

const MEMORY_EXPORT: &str = "memory";
const STACK_SHIFT_EXPORT: &str = "__wbindgen_add_to_stack_pointer";
const ALLOC_EXPORT: &str = "__wbindgen_export_0";
const SOLVE_EXPORT: &str = "wasm_solve";

/// Size of the scratch frame `wasm_solve` writes its results into: a
/// 4-byte status word at offset 0 and an 8-byte float result at offset 8.
const RET_FRAME_BYTES: i32 = 16;

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("unsupported PoW algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("puzzle artifact is missing export `{0}`")]
    MissingExport(&'static str),

    #[error("puzzle execution failed: {0}")]
    Execution(String),
}

impl From<wasmtime::Error> for SolveError {
    fn from(e: wasmtime::Error) -> Self {
        Self::Execution(format!("{e:#}"))
    }
}

/// The narrow solving seam. Implementations must be safe to call from
/// blocking worker threads.
pub trait Solver: Send + Sync {
    fn solve(&self, challenge: &Challenge) -> Result<Option<u64>, SolveError>;
}

/// Executes the upstream-issued puzzle artifact.
///
/// The module is compiled once; every `solve` call instantiates it into a
/// fresh store, so concurrent solves never share mutable memory.
pub struct WasmSolver {
    engine: Engine,
    module: Module,
}

impl WasmSolver {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SolveError> {
        let engine = Engine::default();
        let module = Module::from_file(&engine, path)?;
        Ok(Self { engine, module })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SolveError> {
        let engine = Engine::default();
        let module = Module::new(&engine, bytes)?;
        Ok(Self { engine, module })
    }

    /// Copy a string into guest memory via the artifact's allocator and
    /// return (pointer, length).
    fn write_string(
        store: &mut Store<()>,
        memory: &Memory,
        alloc: &TypedFunc<(i32, i32), i32>,
        text: &str,
    ) -> Result<(i32, i32), SolveError> {
        let bytes = text.as_bytes();
        let len = bytes.len() as i32;
        let ptr = alloc.call(&mut *store, (len, 1))?;
        memory
            .write(&mut *store, ptr as usize, bytes)
            .map_err(|e| SolveError::Execution(e.to_string()))?;
        Ok((ptr, len))
    }

    fn read_bytes<const N: usize>(
        store: &Store<()>,
        memory: &Memory,
        offset: usize,
    ) -> Result<[u8; N], SolveError> {
        let mut buf = [0u8; N];
        memory
            .read(store, offset, &mut buf)
            .map_err(|e| SolveError::Execution(e.to_string()))?;
        Ok(buf)
    }
}

impl Solver for WasmSolver {
    fn solve(&self, challenge: &Challenge) -> Result<Option<u64>, SolveError> {
        if challenge.algorithm != SUPPORTED_ALGORITHM {
            return Err(SolveError::UnsupportedAlgorithm(
                challenge.algorithm.clone(),
            ));
        }

        let mut store = Store::new(&self.engine, ());
        let linker: Linker<()> = Linker::new(&self.engine);
        let instance: Instance = linker.instantiate(&mut store, &self.module)?;

        let memory = instance
            .get_memory(&mut store, MEMORY_EXPORT)
            .ok_or(SolveError::MissingExport(MEMORY_EXPORT))?;
        let stack_shift = instance
            .get_typed_func::<i32, i32>(&mut store, STACK_SHIFT_EXPORT)
            .map_err(|_| SolveError::MissingExport(STACK_SHIFT_EXPORT))?;
        let alloc = instance
            .get_typed_func::<(i32, i32), i32>(&mut store, ALLOC_EXPORT)
            .map_err(|_| SolveError::MissingExport(ALLOC_EXPORT))?;
        let wasm_solve = instance
            .get_typed_func::<(i32, i32, i32, i32, i32, f64), ()>(&mut store, SOLVE_EXPORT)
            .map_err(|_| SolveError::MissingExport(SOLVE_EXPORT))?;

        let prefix = format!("{}_{}_", challenge.salt, challenge.expire_at);

        let retptr = stack_shift.call(&mut store, -RET_FRAME_BYTES)?;
        let (challenge_ptr, challenge_len) =
            Self::write_string(&mut store, &memory, &alloc, &challenge.challenge)?;
        let (prefix_ptr, prefix_len) = Self::write_string(&mut store, &memory, &alloc, &prefix)?;

        let outcome: Result<(i32, f64), SolveError> = (|| {
            wasm_solve.call(
                &mut store,
                (
                    retptr,
                    challenge_ptr,
                    challenge_len,
                    prefix_ptr,
                    prefix_len,
                    challenge.difficulty as f64,
                ),
            )?;
            let status =
                i32::from_le_bytes(Self::read_bytes::<4>(&store, &memory, retptr as usize)?);
            let value =
                f64::from_le_bytes(Self::read_bytes::<8>(&store, &memory, retptr as usize + 8)?);
            Ok((status, value))
        })();

        // Restore the guest stack frame whether or not the solve succeeded.
        stack_shift.call(&mut store, RET_FRAME_BYTES)?;

        let (status, value) = outcome?;
        if status == 0 {
            return Ok(None);
        }
        Ok(Some(value as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::{SUPPORTED_ALGORITHM, SolveError, Solver, WasmSolver};
    use dragoman_types::Challenge;

    fn challenge(algorithm: &str) -> Challenge {
        Challenge {
            algorithm: algorithm.to_string(),
            challenge: "abc".to_string(),
            salt: "s".to_string(),
            difficulty: 144_000,
            expire_at: 4_102_444_800,
            signature: "sig".to_string(),
            target_path: "/api/v0/chat/completion".to_string(),
        }
    }

    #[test]
    fn garbage_artifact_is_rejected_at_load() {
        assert!(WasmSolver::from_bytes(b"not a wasm module").is_err());
    }

    #[test]
    fn foreign_algorithm_is_fatal() {
        // A trivial valid module: no exports, never reached because the
        // algorithm check runs first.
        let module = wat_module();
        let solver = WasmSolver::from_bytes(&module).unwrap();
        let err = solver.solve(&challenge("SomethingElseV2")).unwrap_err();
        assert!(matches!(err, SolveError::UnsupportedAlgorithm(_)));
    }

    #[test]
    fn missing_exports_are_reported() {
        let module = wat_module();
        let solver = WasmSolver::from_bytes(&module).unwrap();
        let err = solver.solve(&challenge(SUPPORTED_ALGORITHM)).unwrap_err();
        assert!(matches!(err, SolveError::MissingExport(_)));
    }

    /// Smallest valid wasm module: magic + version, no sections.
    fn wat_module() -> Vec<u8> {
        vec![0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00]
    }
}
