mod bulk_write;
mod change_stream;
pub(crate) mod util;
