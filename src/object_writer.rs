//! Object writer: the external collaborator the emitter drives to produce
//! an actual object file.
//!
//! The emitter never talks to ELF or COFF directly: it is generic over
//! this trait so the hot lowering pass pays no virtual-dispatch cost.
//! Two concrete writers (ELF, COFF) live outside this crate and satisfy
//! it; [`RecordingWriter`] below is a test double that just logs calls.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::interner::Symbol;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Text,
    RData,
    Data,
    Bss,
}

/// Relocation kinds: REL32 for code references, ABS64 for data. `num_enum`
/// gives a checked round-trip to the numeric tag the object format
/// actually stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub enum RelocationKind {
    Rel32 = 0,
    Abs64 = 1,
}

/// One Itanium call-site-table row: a protected code range and the
/// landing pad it unwinds to (`None` for a cleanup-only entry with no
/// catch).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSiteRecord {
    pub start: u32,
    pub end: u32,
    pub landing_pad: Option<u32>,
    pub action_offset: u32,
}

/// One Itanium action-table row: the type-info symbol a catch filters on
/// (`None` for `catch (...)`) and the next action to try on mismatch (0
/// for "none").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRecord {
    pub type_info: Option<Symbol>,
    pub next_action: i32,
}

/// One MSVC `TryBlockMapEntry`: protected range, handler count, and the
/// handler types it maps to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryBlockRecord {
    pub try_low: u32,
    pub try_high: u32,
    pub catch_high: u32,
    pub handlers: Vec<HandlerTypeRecord>,
}

/// One MSVC `HandlerType`: the exception's type descriptor, catch
/// adjective bits (0x01 const / 0x08 reference / 0x10 rvalue-reference),
/// and the funclet's code offset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerTypeRecord {
    pub type_descriptor: Option<Symbol>,
    pub adjectives: u8,
    pub catch_offset: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnwindMapEntry {
    pub to_state: i32,
    pub action: Option<Symbol>,
}

/// One `__C_specific_handler` SEH scope: protected range plus a filter
/// funclet offset (`None` for `__finally`) and the handler funclet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SehScopeRecord {
    pub start: u32,
    pub end: u32,
    pub filter_offset: Option<u32>,
    pub handler_offset: u32,
}

/// The personality-specific half of a function's exception-handling
/// record: exactly one of these three shapes, chosen at compile time by
/// target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExceptionInfo {
    Itanium { call_sites: Vec<CallSiteRecord>, actions: Vec<ActionRecord> },
    Msvc { try_blocks: Vec<TryBlockRecord>, unwind_map: Vec<UnwindMapEntry> },
    Seh { scopes: Vec<SehScopeRecord> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RttiInfo {
    pub type_name: Symbol,
    pub base_classes: Vec<Symbol>,
}

/// The narrow surface the core drives an object writer through. ELF and
/// COFF implementations live outside this crate.
pub trait ObjectWriter {
    fn add_section_bytes(&mut self, section: Section, bytes: &[u8]);
    fn add_symbol(&mut self, name: Symbol, section: Section, offset: u32, length: u32);
    fn add_relocation(&mut self, offset: u32, symbol: Symbol, kind: RelocationKind, addend: i64);
    fn add_data_relocation(&mut self, sym_from: Symbol, sym_to: Symbol);
    fn add_global_variable_data(&mut self, name: Symbol, size: u32, initialized: bool, bytes: &[u8]);
    fn add_vtable(&mut self, symbol: Symbol, function_symbols: &[Symbol], class_name: Symbol, base_classes: &[Symbol], rtti_info: &RttiInfo);
    fn add_function_exception_info(&mut self, mangled: Symbol, start: u32, length: u32, info: &ExceptionInfo, stack_size: u32);
    fn finalize_debug_info(&mut self);
}

/// Logs every call it receives instead of writing an object file. Used by
/// `lib.rs`'s integration tests to assert the pipeline reached the writer
/// boundary with the right shape of data, without needing a real ELF/COFF
/// backend in this crate.
#[cfg(test)]
#[derive(Debug, Default)]
pub struct RecordingWriter {
    pub calls: Vec<String>,
    pub section_bytes: std::collections::HashMap<&'static str, usize>,
}

#[cfg(test)]
impl RecordingWriter {
    pub fn new() -> Self {
        RecordingWriter::default()
    }

    fn section_name(section: Section) -> &'static str {
        match section {
            Section::Text => "text",
            Section::RData => "rdata",
            Section::Data => "data",
            Section::Bss => "bss",
        }
    }
}

#[cfg(test)]
impl ObjectWriter for RecordingWriter {
    fn add_section_bytes(&mut self, section: Section, bytes: &[u8]) {
        *self.section_bytes.entry(Self::section_name(section)).or_insert(0) += bytes.len();
        self.calls.push(format!("add_section_bytes({}, {} bytes)", Self::section_name(section), bytes.len()));
    }

    fn add_symbol(&mut self, name: Symbol, section: Section, offset: u32, length: u32) {
        self.calls.push(format!("add_symbol({name:?}, {}, {offset}, {length})", Self::section_name(section)));
    }

    fn add_relocation(&mut self, offset: u32, symbol: Symbol, kind: RelocationKind, addend: i64) {
        self.calls.push(format!("add_relocation({offset}, {symbol:?}, {kind:?}, {addend})"));
    }

    fn add_data_relocation(&mut self, sym_from: Symbol, sym_to: Symbol) {
        self.calls.push(format!("add_data_relocation({sym_from:?}, {sym_to:?})"));
    }

    fn add_global_variable_data(&mut self, name: Symbol, size: u32, initialized: bool, bytes: &[u8]) {
        self.calls.push(format!("add_global_variable_data({name:?}, {size}, {initialized}, {} bytes)", bytes.len()));
    }

    fn add_vtable(&mut self, symbol: Symbol, function_symbols: &[Symbol], class_name: Symbol, base_classes: &[Symbol], _rtti_info: &RttiInfo) {
        self.calls.push(format!(
            "add_vtable({symbol:?}, {} fns, {class_name:?}, {} bases)",
            function_symbols.len(),
            base_classes.len()
        ));
    }

    fn add_function_exception_info(&mut self, mangled: Symbol, start: u32, length: u32, _info: &ExceptionInfo, stack_size: u32) {
        self.calls.push(format!("add_function_exception_info({mangled:?}, {start}, {length}, stack={stack_size})"));
    }

    fn finalize_debug_info(&mut self) {
        self.calls.push("finalize_debug_info()".into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_writer_accumulates_section_byte_counts_across_calls() {
        let mut w = RecordingWriter::new();
        w.add_section_bytes(Section::Text, &[0u8; 16]);
        w.add_section_bytes(Section::Text, &[0u8; 4]);
        assert_eq!(w.section_bytes["text"], 20);
        assert_eq!(w.calls.len(), 2);
    }

    #[test]
    fn relocation_kind_round_trips_through_its_numeric_tag() {
        let tag: u8 = RelocationKind::Abs64.into();
        assert_eq!(RelocationKind::try_from(tag).unwrap(), RelocationKind::Abs64);
    }
}
