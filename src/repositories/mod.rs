pub mod chart_table;
pub mod mapping;

pub use chart_table::{ChartStore, PgChartStore};
pub use mapping::{ChartMapping, MappingStore, NewChartMapping, PgMappingStore};
