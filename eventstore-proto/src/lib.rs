//! Generated protobuf/gRPC types for the `eventstore.v1` service.

pub mod gen {
    tonic::include_proto!("eventstore.v1");
}
