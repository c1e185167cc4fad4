//! Data model shared by the DAP2 and DAP4 decoders and the client.

pub mod attributes;
pub mod dataset;
pub mod dtype;
pub mod error;
pub mod escape;
pub mod node;
pub mod value;

pub use attributes::{AttrScalar, AttributeValue, Attributes};
pub use dataset::{in_scope, Dataset};
pub use dtype::{DataType, Protocol};
pub use error::{DapError, DapResult, PositionHint, SourcePosition};
pub use escape::{encode_query_component, escape_name, unescape_name};
pub use node::{
    Content, Dim, Dimension, Enumeration, Grid, Group, Leaf, Node, NodeKind, RemoteSource,
    Sequence, Structure, Variable,
};
pub use value::{ArrayData, Record, Scalar, Value, VariableData};
