//! MSVC exception-handling tables: `FuncInfo`-style `TryBlockMapEntry`/
//! `HandlerType`/`UnwindMapEntry` rows, plus the adjective bits a
//! `HandlerType` carries.

use bitflags::bitflags;

use crate::interner::Symbol;
use crate::object_writer::{ExceptionInfo, HandlerTypeRecord, TryBlockRecord, UnwindMapEntry};

bitflags! {
    /// Catch-clause adjectives MSVC encodes into `HandlerType::adjectives`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CatchAdjectives: u8 {
        const CONST           = 0x01;
        const REFERENCE       = 0x08;
        const RVALUE_REFERENCE = 0x10;
    }
}

#[derive(Debug, Clone)]
pub struct CatchClauseInfo {
    /// `None` for `catch (...)`.
    pub type_descriptor: Option<Symbol>,
    pub adjectives: CatchAdjectives,
    pub catch_offset: u32,
}

/// Accumulates `TryBlockMapEntry` rows and the unwind-state graph they
/// reference while a function's body is lowered, then folds them into an
/// [`ExceptionInfo::Msvc`] record. Deriving the IP-to-state table from this
/// unwind map is the emitter's job at link time; this builder only owns
/// the state-transition graph itself.
#[derive(Debug, Default)]
pub struct MsvcEhBuilder {
    try_blocks: Vec<TryBlockRecord>,
    unwind_map: Vec<UnwindMapEntry>,
}

impl MsvcEhBuilder {
    pub fn new() -> Self {
        MsvcEhBuilder::default()
    }

    /// Registers a new unwind state whose cleanup action is `action`
    /// (`None` for "nothing to run, just continue unwinding to the parent
    /// state"). Returns the new state's index.
    pub fn add_unwind_state(&mut self, action: Option<Symbol>) -> i32 {
        let state = self.unwind_map.len() as i32;
        self.unwind_map.push(UnwindMapEntry { to_state: state - 1, action });
        state
    }

    pub fn add_try_block(&mut self, try_low: u32, try_high: u32, catch_high: u32, handlers: &[CatchClauseInfo]) {
        let handlers = handlers
            .iter()
            .map(|h| HandlerTypeRecord { type_descriptor: h.type_descriptor, adjectives: h.adjectives.bits(), catch_offset: h.catch_offset })
            .collect();
        self.try_blocks.push(TryBlockRecord { try_low, try_high, catch_high, handlers });
    }

    pub fn finish(self) -> ExceptionInfo {
        ExceptionInfo::Msvc { try_blocks: self.try_blocks, unwind_map: self.unwind_map }
    }

    pub fn is_empty(&self) -> bool {
        self.try_blocks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwind_states_chain_to_their_immediate_predecessor() {
        let mut b = MsvcEhBuilder::new();
        let s0 = b.add_unwind_state(Some(Symbol::dummy()));
        let s1 = b.add_unwind_state(Some(Symbol::dummy()));
        assert_eq!(s0, 0);
        assert_eq!(s1, 1);
        match b.finish() {
            ExceptionInfo::Msvc { unwind_map, .. } => {
                assert_eq!(unwind_map[1].to_state, 0);
                assert_eq!(unwind_map[0].to_state, -1);
            }
            _ => panic!("expected Msvc variant"),
        }
    }

    #[test]
    fn reference_catch_sets_the_reference_adjective_bit() {
        let mut b = MsvcEhBuilder::new();
        b.add_try_block(
            0,
            10,
            20,
            &[CatchClauseInfo { type_descriptor: Some(Symbol::dummy()), adjectives: CatchAdjectives::REFERENCE, catch_offset: 30 }],
        );
        match b.finish() {
            ExceptionInfo::Msvc { try_blocks, .. } => {
                assert_eq!(try_blocks[0].handlers[0].adjectives, CatchAdjectives::REFERENCE.bits());
            }
            _ => panic!("expected Msvc variant"),
        }
    }
}
