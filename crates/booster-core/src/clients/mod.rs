//! HTTP clients for the operator dispatcher, the lead buffer and the
//! origination sinks.

pub mod dispatcher;
pub mod http;
pub mod leads;
pub mod origination;

pub use dispatcher::DispatcherClient;
pub use http::ApiClient;
pub use leads::LeadBufferClient;
pub use origination::{http_sink_pool, HttpSink};
