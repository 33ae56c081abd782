//! Token comparison and structural checks shared by every policy.

use crate::error::{CsrfError, Result};
use subtle::ConstantTimeEq;

/// Longest submitted token accepted before any comparison is attempted.
pub const MAX_SUBMITTED_LEN: usize = 512;

/// Compare two byte strings without leaking where they first differ.
///
/// Inputs of different length fail immediately; only the length is leaked.
pub fn constant_time_equals(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

/// Reject submitted values that cannot possibly be a token we issued.
///
/// Empty values, oversized values and anything outside printable ASCII are
/// refused as [`CsrfError::TokenMismatch`]; emptiness is treated as a
/// mismatch too because a token is bound at this point.
pub fn check_submitted(submitted: &str) -> Result<()> {
    if submitted.is_empty() || submitted.len() > MAX_SUBMITTED_LEN {
        return Err(CsrfError::TokenMismatch);
    }
    if !submitted.bytes().all(|b| b.is_ascii_graphic()) {
        return Err(CsrfError::TokenMismatch);
    }
    Ok(())
}
