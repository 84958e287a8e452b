use clawdini_core::error::Result;
use clawdini_core::types::NodePayload;

use crate::runner::{Incoming, NodeOutcome};

use super::joined_text;

/// Collect the text of all completed in-edges and emit the concatenation.
pub(crate) fn execute(inputs: &[Incoming]) -> Result<NodeOutcome> {
    Ok(NodeOutcome::completed(NodePayload::text(joined_text(inputs))))
}
