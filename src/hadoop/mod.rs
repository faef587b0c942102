//! Hadoop specifics: config files, source modules, example jobs and the
//! YARN REST API.

pub mod app;
pub mod modules;
pub mod xml_config;
pub mod yarn;

pub use app::Application;
pub use modules::builtin_modules;
pub use xml_config::{apply_properties, HadoopConfigFile, PatchError, PropertyPatch};
pub use yarn::{ClusterMetrics, QueueInfo, YarnClient};
