pub mod binder;
pub mod catalog;
pub mod config;
pub mod evaluator;
pub mod expr;
pub mod format;
pub mod projection;
pub mod provider;
pub mod rowsource;
pub mod types;
pub mod util;

pub use catalog::{Entity, EntityRegistry, TableInfo};
pub use config::ProviderConfig;
pub use expr::Expr;
pub use provider::query::{Query, QueryResults};
pub use provider::{QueryProvider, Translation};
pub use rowsource::{Cursor, RowSource};
pub use types::{DataType, FromValue, RecordValue, Value};
