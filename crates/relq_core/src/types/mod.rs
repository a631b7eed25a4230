pub mod datatype;
pub mod from_value;
pub mod value;

pub use datatype::{DataType, Field};
pub use from_value::FromValue;
pub use value::{RecordValue, Value};
