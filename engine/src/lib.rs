// weft — node-graph behavior engine
//
// Library root. A behavior graph runs either on the reflection interpreter
// (`interp`) or, after emission (`emit`) and loading (`sink`), on the script
// VM (`script::vm`). Both backends share `resolve`, `analysis` and `node`.

pub mod analysis;
pub mod check;
pub mod diag;
pub mod dot;
pub mod emit;
pub mod error;
pub mod exec;
pub mod facade;
pub mod graph;
pub mod host;
pub mod id;
pub mod interp;
pub mod node;
pub mod pipeline;
pub mod reference;
pub mod resolve;
pub mod sched;
pub mod script;
pub mod sink;
pub mod store;
pub mod value;
