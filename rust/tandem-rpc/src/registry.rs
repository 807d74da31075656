//! Program registry and router.
//!
//! Services are addressed the classic way: a named program with a 32-bit
//! id and version, holding procedures keyed by small integers. The
//! registry is an explicit context struct (no global table), mutated
//! only at load/unload boundaries and read under a shared lock during
//! dispatch, so a lookup never observes a half-registered program.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use crate::status::Status;

/// A procedure body: raw argument bytes in, raw result bytes or a typed
/// status out.
pub type ProcedureFn = Box<dyn Fn(&[u8]) -> Result<Vec<u8>, Status> + Send + Sync>;

/// Compose a procedure from the classic (decoder, handler, encoder)
/// triple.
pub fn codec_procedure<A, R>(
    decode: impl Fn(&[u8]) -> Result<A, Status> + Send + Sync + 'static,
    handler: impl Fn(A) -> Result<R, Status> + Send + Sync + 'static,
    encode: impl Fn(&R) -> Vec<u8> + Send + Sync + 'static,
) -> ProcedureFn {
    Box::new(move |args| {
        let decoded = decode(args)?;
        let result = handler(decoded)?;
        Ok(encode(&result))
    })
}

/// One registered service.
pub struct ProgramDef {
    name: String,
    program: u32,
    version: u32,
    procedures: BTreeMap<u32, ProcedureFn>,
}

impl ProgramDef {
    pub fn new(name: impl Into<String>, program: u32, version: u32) -> Self {
        Self {
            name: name.into(),
            program,
            version,
            procedures: BTreeMap::new(),
        }
    }

    /// Add a procedure (builder style). Replaces any previous body for
    /// the same id.
    pub fn procedure(
        mut self,
        id: u32,
        body: impl Fn(&[u8]) -> Result<Vec<u8>, Status> + Send + Sync + 'static,
    ) -> Self {
        self.procedures.insert(id, Box::new(body));
        self
    }

    /// Program name, for diagnostics.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Program id.
    pub fn program(&self) -> u32 {
        self.program
    }

    /// Program version.
    pub fn version(&self) -> u32 {
        self.version
    }
}

/// The flat program table.
pub struct Registry {
    programs: RwLock<BTreeMap<u32, ProgramDef>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            programs: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a program. A duplicate program id is rejected: two
    /// services cannot share an address.
    pub fn register(&self, def: ProgramDef) -> Result<(), Status> {
        let mut programs = self
            .programs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if programs.contains_key(&def.program) {
            tracing::debug!(
                program = def.program,
                name = %def.name,
                "duplicate program registration rejected"
            );
            return Err(Status::AlreadyRegistered);
        }
        tracing::debug!(
            program = def.program,
            name = %def.name,
            version = def.version,
            "program registered"
        );
        programs.insert(def.program, def);
        Ok(())
    }

    /// Remove a program by id. Deliberately a no-op, not an error, when
    /// the id is absent, so unload paths can run unconditionally.
    pub fn unregister(&self, program: u32) {
        let mut programs = self
            .programs
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if programs.remove(&program).is_some() {
            tracing::debug!(program, "program unregistered");
        }
    }

    /// True if a program with this id is registered.
    pub fn is_registered(&self, program: u32) -> bool {
        self.programs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&program)
    }

    /// Check that (program, version, procedure) resolves, without
    /// invoking anything. Cheap enough for notification context.
    pub fn resolve(&self, program: u32, version: u32, procedure: u32) -> Status {
        let programs = self.programs.read().unwrap_or_else(PoisonError::into_inner);
        match programs.get(&program) {
            None => Status::ProgramUnavailable,
            Some(def) if def.version != version => Status::VersionMismatch,
            Some(def) if !def.procedures.contains_key(&procedure) => {
                Status::ProcedureUnavailable
            }
            Some(_) => Status::Success,
        }
    }

    /// Resolve and invoke a procedure.
    ///
    /// The shared lock is held for the duration of the body, so an unload
    /// cannot race a call already dispatching into the program.
    pub fn dispatch(
        &self,
        program: u32,
        version: u32,
        procedure: u32,
        args: &[u8],
    ) -> Result<Vec<u8>, Status> {
        let programs = self.programs.read().unwrap_or_else(PoisonError::into_inner);
        let def = programs.get(&program).ok_or(Status::ProgramUnavailable)?;
        if def.version != version {
            return Err(Status::VersionMismatch);
        }
        let body = def
            .procedures
            .get(&procedure)
            .ok_or(Status::ProcedureUnavailable)?;
        body(args)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo_program(id: u32, version: u32) -> ProgramDef {
        ProgramDef::new("echo", id, version).procedure(1, |args| Ok(args.to_vec()))
    }

    #[test]
    fn dispatch_invokes_registered_procedure() {
        let registry = Registry::new();
        registry.register(echo_program(0x100, 1)).unwrap();

        let result = registry.dispatch(0x100, 1, 1, b"hello").unwrap();
        assert_eq!(result, b"hello");
    }

    #[test]
    fn duplicate_program_id_is_rejected() {
        let registry = Registry::new();
        registry.register(echo_program(0x100, 1)).unwrap();
        assert_eq!(
            registry.register(echo_program(0x100, 2)).unwrap_err(),
            Status::AlreadyRegistered
        );
        // The original registration is untouched.
        assert_eq!(registry.resolve(0x100, 1, 1), Status::Success);
    }

    #[test]
    fn unregister_absent_is_idempotent() {
        let registry = Registry::new();
        // Absent id: silently fine, any number of times.
        registry.unregister(0xDEAD);
        registry.unregister(0xDEAD);

        registry.register(echo_program(0x100, 1)).unwrap();
        registry.unregister(0x100);
        registry.unregister(0x100);
        assert!(!registry.is_registered(0x100));
        // And the id is free for re-registration.
        registry.register(echo_program(0x100, 1)).unwrap();
    }

    #[test]
    fn resolution_failures_are_distinct() {
        let registry = Registry::new();
        registry.register(echo_program(0x100, 3)).unwrap();

        assert_eq!(registry.resolve(0xDEAD, 1, 1), Status::ProgramUnavailable);
        assert_eq!(registry.resolve(0x100, 2, 1), Status::VersionMismatch);
        assert_eq!(registry.resolve(0x100, 3, 99), Status::ProcedureUnavailable);
        assert_eq!(registry.resolve(0x100, 3, 1), Status::Success);

        assert_eq!(
            registry.dispatch(0xDEAD, 1, 1, b"").unwrap_err(),
            Status::ProgramUnavailable
        );
    }

    #[test]
    fn codec_triple_composes() {
        let proc = codec_procedure(
            |args: &[u8]| {
                let bytes: [u8; 4] = args.try_into().map_err(|_| Status::ReceiveFailure)?;
                Ok(u32::from_le_bytes(bytes))
            },
            |n: u32| Ok(n + 1),
            |n: &u32| n.to_le_bytes().to_vec(),
        );

        assert_eq!(proc(&7u32.to_le_bytes()), Ok(8u32.to_le_bytes().to_vec()));
        assert_eq!(proc(b"bad"), Err(Status::ReceiveFailure));
    }
}
