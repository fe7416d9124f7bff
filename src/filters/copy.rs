//! Passthrough filter

use crate::error::Result;
use crate::filter::{Filter, FilterInstance, FilterStatus, Opened};
use crate::track::FilterContext;

/// Forwards its input unchanged
pub struct CopyFilter;

struct CopyInstance;

impl Filter for CopyFilter {
    fn name(&self) -> &str {
        "core.copy"
    }

    fn open(&self, _ctx: &mut FilterContext<'_>) -> Result<Opened> {
        Ok(Opened::new(CopyInstance))
    }
}

impl FilterInstance for CopyInstance {
    fn process(&mut self, ctx: &mut FilterContext<'_>) -> FilterStatus {
        let data = ctx.take_input();
        ctx.set_output(data);
        if ctx.is_last() {
            FilterStatus::Done
        } else {
            FilterStatus::Ok
        }
    }
}
