//! Build script generating the LeapBrushApi client and server bindings
//!
//! The service is described with tonic-build's manual builder so no `protoc`
//! is needed: every method carries the opaque `Payload` type over the
//! crate's own `PayloadCodec`.

use tonic_build::manual::{Builder, Method, Service};

const PAYLOAD: &str = "crate::payload::Payload";
const CODEC: &str = "crate::codec::PayloadCodec";

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let register_and_listen = Method::builder()
        .name("register_and_listen")
        .route_name("RegisterAndListen")
        .input_type(PAYLOAD)
        .output_type(PAYLOAD)
        .codec_path(CODEC)
        .server_streaming()
        .build();

    let update_device = Method::builder()
        .name("update_device")
        .route_name("UpdateDevice")
        .input_type(PAYLOAD)
        .output_type(PAYLOAD)
        .codec_path(CODEC)
        .build();

    let update_device_stream = Method::builder()
        .name("update_device_stream")
        .route_name("UpdateDeviceStream")
        .input_type(PAYLOAD)
        .output_type(PAYLOAD)
        .codec_path(CODEC)
        .client_streaming()
        .build();

    let rpc = Method::builder()
        .name("rpc")
        .route_name("Rpc")
        .input_type(PAYLOAD)
        .output_type(PAYLOAD)
        .codec_path(CODEC)
        .build();

    let service = Service::builder()
        .name("LeapBrushApi")
        .package("leapbrush")
        .method(register_and_listen)
        .method(update_device)
        .method(update_device_stream)
        .method(rpc)
        .build();

    Builder::new().compile(&[service]);
}
