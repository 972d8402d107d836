//! tonic codec moving [`Payload`]s on the wire unchanged

use bytes::{Buf, BufMut};
use tonic::codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder};
use tonic::Status;

use crate::payload::Payload;

/// Codec used by every LeapBrushApi method
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadCodec;

impl Codec for PayloadCodec {
    type Encode = Payload;
    type Decode = Payload;
    type Encoder = PayloadEncoder;
    type Decoder = PayloadDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        PayloadEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        PayloadDecoder
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadEncoder;

impl Encoder for PayloadEncoder {
    type Item = Payload;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        dst.put(item.into_bytes());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadDecoder;

impl Decoder for PayloadDecoder {
    type Item = Payload;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        let bytes = src.copy_to_bytes(src.remaining());
        Ok(Some(Payload::from_wire(bytes)))
    }
}
