//! x86-64 emitter: the compiler's last phase, turning a typed
//! [`crate::ir::IrFunction`] into machine code and exception-handling
//! metadata for an [`crate::object_writer::ObjectWriter`].

pub mod eh_itanium;
pub mod eh_msvc;
pub mod lowering;
pub mod mangling;
pub mod regalloc;

pub use lowering::{CodeGenError, FunctionEmitter};

use crate::config::{TargetAbi, TargetConfig};
use crate::interner::Symbol;
use crate::ir::IrFunction;
use crate::object_writer::{ExceptionInfo, ObjectWriter};

use eh_itanium::ItaniumEhBuilder;
use eh_msvc::MsvcEhBuilder;

/// Emits one function's code and, if it contains any exception-handling
/// constructs, its personality-specific metadata. `eh` is built up by the
/// caller while lowering `func`'s `try`/`catch` structure; passing `None`
/// skips the exception-info record entirely, matching a function with no
/// `try` blocks.
pub fn emit_function<W: ObjectWriter>(
    config: &TargetConfig,
    writer: &mut W,
    func: &IrFunction,
    mangled_name: Symbol,
    stack_size: u32,
    eh: Option<EhTables>,
) -> Result<(), CodeGenError> {
    let emitter = FunctionEmitter::new(config, writer);
    emitter.lower_function(func, mangled_name)?;

    if let Some(eh) = eh {
        let info = eh.finish(config.abi);
        writer.add_function_exception_info(mangled_name, 0, 0, &info, stack_size);
    }
    Ok(())
}

/// The personality-specific exception-handling builder selected for the
/// target ABI a function is being compiled against.
pub enum EhTables {
    Itanium(ItaniumEhBuilder),
    Msvc(MsvcEhBuilder),
}

impl EhTables {
    pub fn for_target(abi: TargetAbi) -> Self {
        match abi {
            TargetAbi::Itanium => EhTables::Itanium(ItaniumEhBuilder::new()),
            TargetAbi::Msvc => EhTables::Msvc(MsvcEhBuilder::new()),
        }
    }

    fn finish(self, abi: TargetAbi) -> ExceptionInfo {
        match (self, abi) {
            (EhTables::Itanium(b), _) => b.finish(),
            (EhTables::Msvc(b), _) => b.finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::SourceSpan;
    use crate::interner::StringInterner;
    use crate::ir::{InstrPayload, IrValue};
    use crate::object_writer::RecordingWriter;
    use crate::token::{Token, TokenKind};
    use crate::types::BaseKind;

    #[test]
    fn emitting_a_function_with_no_eh_skips_the_exception_info_call() {
        let config = TargetConfig::itanium_sysv();
        let mut writer = RecordingWriter::new();
        let mut func = IrFunction::new();
        let tok = Token::new(TokenKind::Punctuator, Symbol::dummy(), SourceSpan::new(0, 0, 0));
        func.emit(InstrPayload::Return(Some(crate::ir::TypedValue::scalar(IrValue::IntLiteral(0), BaseKind::Int, 32))), tok);

        let mut interner = StringInterner::new();
        let name = interner.intern("f");
        emit_function(&config, &mut writer, &func, name, 0, None).unwrap();

        assert!(!writer.calls.iter().any(|c| c.starts_with("add_function_exception_info")));
    }
}
