//! Migration of legacy pickled CMaps to JSON.
//!
//! CMaps used to be distributed as `<name>.pickle.gz`: a gzip-compressed
//! Python pickle of `{"IS_VERTICAL": bool, "CODE2CID": {int: ...}}`. This
//! module reads those files and writes the equivalent `<name>.json.gz`
//! through the same reproducible gzip writer as the table converter.

mod convert;
pub mod pickle;

pub use convert::{
    convert_directory, convert_pickle_to_json, convert_pickle_to_json_with_level,
    load_pickle_gz, to_json, PICKLE_SUFFIX,
};
pub use pickle::PickleValue;
