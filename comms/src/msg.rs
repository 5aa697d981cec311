use std::{borrow::Cow, io};

use serde::{Deserialize as De, Serialize as Ser};

use crate::{
    Deserialize, Serialize,
    specs::{PlanSpec, TrainConfigSpec},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR: Header = 0;
const CONTROL: Header = 1;
const DATA: Header = 2;
const TEXT: Header = 3;

/// The command for the `Control` variant of the `Msg` enum.
///
/// Every request the coordinator sends is answered by exactly one of `Ack`,
/// `Loss`, `Tensor` (followed by a `Data` frame) or a `Msg::Err`.
#[derive(Debug, Clone, PartialEq, Ser, De)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Drop every tensor, config and plan stored on the worker.
    ClearObjects,
    /// Announces the shape of the tensor carried by the next `Data` frame.
    StoreTensor { label: String, shape: Vec<usize> },
    SetTrainConfig(TrainConfigSpec),
    StorePlan(PlanSpec),
    /// Runs the stored plan over the stored tensors.
    Fit { dataset_key: String, epoch: usize },
    FetchTensor { label: String },
    Ack,
    /// Sent as its bit pattern, JSON has no NaN nor infinity.
    Loss(#[serde(with = "f32_bits")] f32),
    /// Reply to `FetchTensor`, the values follow in a `Data` frame.
    Tensor { label: String, shape: Vec<usize> },
    Disconnect,
}

mod f32_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f32, D::Error> {
        u32::deserialize(deserializer).map(f32::from_bits)
    }
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Data(&'a [f32]),
    Text(Cow<'a, str>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// A short name of the message kind, used in protocol violation reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Msg::Control(_) => "control",
            Msg::Data(_) => "data",
            Msg::Text(_) => "text",
            Msg::Err(_) => "err",
        }
    }

    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> Option<&'a [u8]> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Some(e.as_bytes())
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());

                // SAFETY: Serialize impl for `Command` is derived and not implemented
                //         by hand. Nor has a non string-key map inside.
                serde_json::to_writer(buf, cmd).unwrap();
                None
            }
            Msg::Data(nums) => {
                buf.extend_from_slice(&DATA.to_be_bytes());
                Some(bytemuck::cast_slice(nums))
            }
            Msg::Text(text) => {
                buf.extend_from_slice(&TEXT.to_be_bytes());
                Some(text.as_bytes())
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a mut [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at_mut(HEADER_SIZE);

        // SAFETY: We splitted the buffer to be of size `HEADER_SIZE` just above.
        let kind = Header::from_be_bytes(kind_buf.try_into().unwrap());
        let rest: &'a [u8] = rest;

        match kind {
            ERR | TEXT => {
                let string = str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                if kind == ERR {
                    Ok(Self::Err(Cow::Borrowed(string)))
                } else {
                    Ok(Self::Text(Cow::Borrowed(string)))
                }
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            DATA => {
                let nums = bytemuck::try_cast_slice(rest).map_err(|err| {
                    io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("tensor payload of {} bytes: {err:?}", rest.len()),
                    )
                })?;

                Ok(Self::Data(nums))
            }
            kind => Self::invalid_kind(kind),
        }
    }
}
