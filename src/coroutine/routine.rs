use super::context::{Context, Stack};

pub(crate) const DEFAULT_STACK_BYTES: usize = 256 * 1024;

/// One cooperatively-scheduled execution context: a register snapshot and
/// the stack it runs on, plus this engine's intrusive list membership.
pub(crate) struct Routine {
    pub(crate) ctx: Context,
    pub(crate) stack: Stack,
    pub(crate) entry: Option<Box<dyn FnOnce() + 'static>>,
    pub(crate) finished: bool,
}

impl Routine {
    pub(crate) fn new(stack_bytes: usize, entry: Box<dyn FnOnce() + 'static>) -> Self {
        Self {
            ctx: Context::default(),
            stack: Stack::new(stack_bytes.max(4096)),
            entry: Some(entry),
            finished: false,
        }
    }
}
