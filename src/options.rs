//! Contains all of the types needed to specify options to MongoDB operations.
//!
//! Most of the options structs in this module use the
//! [`typed-builder`](https://crates.io/crates/typed-builder) crate to derive a type-safe builder
//! API on them. For example, to create an instance of
//! [`FindOptions`](struct.FindOptions.html) with only `limit` and `batch_size` set, the builder
//! API can be used as follows:
//!
//! ```rust
//! # use mongodb_cursor_core::options::FindOptions;
//! #
//! # let options = FindOptions::builder()
//! #                   .limit(20)
//! #                   .batch_size(5)
//! #                   .build();
//! ```

pub use crate::{
    bulk_write::UpdateModifications,
    change_stream::options::*,
    client::options::*,
    coll::options::*,
    concern::*,
    db::options::*,
};

/// Updates an options struct with the read concern/write concern of a
/// client/database/collection.
macro_rules! resolve_options {
    ($obj:expr, $opts:expr, [$( $field:ident ),+] ) => {
        $(
            if let Some(option) = $obj.$field() {
                if !$opts
                    .as_ref()
                    .map(|opts| opts.$field.is_some())
                    .unwrap_or(false)
                {
                    $opts.get_or_insert_with(Default::default).$field = Some(option.clone());
                }
            }
        )+
    };
}

pub(crate) use resolve_options;
