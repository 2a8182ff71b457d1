//! In-memory data model of the monitoring console.
//!
//! Raw per-second samples live in fixed-capacity [`buffer::SeriesBuffer`]s,
//! one per series and instance. Whenever a buffer completes a UTC minute the
//! minutes tier of the [`aggregate`] hierarchy consumes it, minutes roll into
//! hours and hours into days — all with bounded memory and structurally
//! shared backing storage, so retaining a day of history costs a handful of
//! slot arrays rather than a day of raw samples.

pub mod aggregate;
pub mod annotations;
pub mod buffer;
pub mod lookup;
