/*! This library safely records GPU work on top of `rhi-hal`.
 *  Callers describe what they touch and how; the recorder works out
 *  the barriers every backend needs, defers commands so barriers can
 *  be hoisted out of passes, and tracks resource lifetimes across
 *  submissions.
 */

#![allow(
    // It is much clearer to assert negative conditions with eq! false
    clippy::bool_assert_comparison,
    // We don't use syntax sugar where it's not necessary.
    clippy::match_like_matches_macro,
    // Redundant matching is more explicit.
    clippy::redundant_pattern_matching,
    // Explicit lifetimes are often easier to reason about.
    clippy::needless_lifetimes,
    // No need for defaults in the internal types.
    clippy::new_without_default,
    // Need many arguments for some core functions to be able to re-use code in many situations.
    clippy::too_many_arguments,
    // Clashes with clippy::pattern_type_mismatch
    clippy::needless_borrowed_reference,
)]
#![warn(
    trivial_casts,
    trivial_numeric_casts,
    unsafe_op_in_unsafe_fn,
    unused_extern_crates,
    unused_qualifications,
    // We don't match on a reference, unless required.
    clippy::pattern_type_mismatch,
)]

#[macro_use]
mod assertions;

pub mod command;
pub mod descriptor;
pub mod device;
pub mod error;
pub mod resource;
pub mod track;

pub use hal;
pub use hal::{ResourceState, MAX_COLOR_ATTACHMENTS, MAX_PUSH_CONSTANT_SIZE};

/// The index of a queue submission.
///
/// These are the values stored in `Device::fence`.
pub type SubmissionIndex = hal::FenceValue;

pub type Label<'a> = Option<&'a str>;

trait LabelHelpers<'a> {
    fn to_string_or_default(&self) -> String;
}
impl<'a> LabelHelpers<'a> for Label<'a> {
    fn to_string_or_default(&self) -> String {
        self.map(str::to_string).unwrap_or_default()
    }
}
