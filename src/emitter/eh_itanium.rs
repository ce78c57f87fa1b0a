//! Itanium C++ ABI exception-handling tables: the `.gcc_except_table`-style
//! call-site and action tables that accompany a function's code when it
//! is compiled against an Itanium personality routine
//! (`__gxx_personality_v0`).

use crate::interner::Symbol;
use crate::object_writer::{ActionRecord, CallSiteRecord, ExceptionInfo};

/// One source-level `try` region being tracked while a function's body is
/// lowered: its protected code range and the `catch` clauses guarding it,
/// recorded in source order — the innermost matching handler wins, which
/// the action-table's `next_action` chain encodes.
#[derive(Debug, Clone)]
pub struct TryRegion {
    pub start: u32,
    pub end: Option<u32>,
    pub catches: Vec<CatchRegion>,
}

#[derive(Debug, Clone)]
pub struct CatchRegion {
    /// `None` for `catch (...)`.
    pub type_info: Option<Symbol>,
    pub landing_pad: u32,
}

/// Accumulates call sites and actions across a function's body, then
/// folds them into an [`ExceptionInfo::Itanium`] record once lowering is
/// done. One instance per function that contains at least one `try`.
#[derive(Debug, Default)]
pub struct ItaniumEhBuilder {
    call_sites: Vec<CallSiteRecord>,
    actions: Vec<ActionRecord>,
}

impl ItaniumEhBuilder {
    pub fn new() -> Self {
        ItaniumEhBuilder::default()
    }

    /// Registers `region`'s catches as a chain of action-table rows (each
    /// pointing to the next on type mismatch, terminated by 0) and records
    /// one call-site row pointing at the chain's head. Returns the
    /// call-site's landing pad for the emitter to branch to on an
    /// in-flight unwind.
    pub fn add_try_region(&mut self, region: &TryRegion) -> u32 {
        let end = region.end.unwrap_or(region.start);
        if region.catches.is_empty() {
            self.call_sites.push(CallSiteRecord { start: region.start, end, landing_pad: None, action_offset: 0 });
            return 0;
        }

        let first_action_index = self.actions.len();
        for (i, catch) in region.catches.iter().enumerate() {
            let is_last = i + 1 == region.catches.len();
            self.actions.push(ActionRecord {
                type_info: catch.type_info,
                next_action: if is_last { 0 } else { 1 },
            });
        }
        let landing_pad = region.catches[0].landing_pad;
        self.call_sites.push(CallSiteRecord {
            start: region.start,
            end,
            landing_pad: Some(landing_pad),
            action_offset: (first_action_index + 1) as u32,
        });
        landing_pad
    }

    /// A protected range with no matching catch in this function — a
    /// cleanup-only call site. Stack unwinding runs destructors for every
    /// stack-allocated object whose constructor already completed.
    pub fn add_cleanup_region(&mut self, start: u32, end: u32, landing_pad: u32) {
        self.call_sites.push(CallSiteRecord { start, end, landing_pad: Some(landing_pad), action_offset: 0 });
    }

    pub fn finish(self) -> ExceptionInfo {
        ExceptionInfo::Itanium { call_sites: self.call_sites, actions: self.actions }
    }

    pub fn is_empty(&self) -> bool {
        self.call_sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_with_no_catches_records_a_cleanup_only_call_site() {
        let mut b = ItaniumEhBuilder::new();
        let pad = b.add_try_region(&TryRegion { start: 0, end: Some(10), catches: vec![] });
        assert_eq!(pad, 0);
        match b.finish() {
            ExceptionInfo::Itanium { call_sites, actions } => {
                assert_eq!(call_sites.len(), 1);
                assert!(call_sites[0].landing_pad.is_none());
                assert!(actions.is_empty());
            }
            _ => panic!("expected Itanium variant"),
        }
    }

    #[test]
    fn multiple_catches_chain_through_next_action_and_terminate_at_zero() {
        let mut b = ItaniumEhBuilder::new();
        let region = TryRegion {
            start: 0,
            end: Some(20),
            catches: vec![
                CatchRegion { type_info: Some(Symbol::dummy()), landing_pad: 30 },
                CatchRegion { type_info: None, landing_pad: 40 },
            ],
        };
        b.add_try_region(&region);
        match b.finish() {
            ExceptionInfo::Itanium { actions, .. } => {
                assert_eq!(actions.len(), 2);
                assert_eq!(actions[0].next_action, 1);
                assert_eq!(actions[1].next_action, 0);
                assert!(actions[1].type_info.is_none());
            }
            _ => panic!("expected Itanium variant"),
        }
    }
}
