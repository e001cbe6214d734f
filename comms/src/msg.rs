use std::{borrow::Cow, fmt::Display, io};

use crate::{
    Deserialize, Serialize,
    specs::{ModuleSpec, OptimizerSpec},
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

/// Identifies a module hosted by a worker.
pub type ModuleId = u32;

/// Identifies a distributed autograd context, `0` means no gradient recording.
pub type ContextId = u64;

/// The context id used for forward passes that must not be recorded.
pub const NO_GRAD: ContextId = 0;

const ERR: Header = 0;
const CONTROL: Header = 1;
const FORWARD: Header = 2;
const BACKWARD: Header = 3;
const TENSOR: Header = 4;
const PARAMS: Header = 5;

/// The payload data for the `Data` variant of the `Msg` enum.
///
/// Tensors travel as row-major `(rows, len / rows)` matrices of `f32`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// Run a forward pass of `module` over `data`, recording it under `ctx`.
    Forward {
        module: ModuleId,
        ctx: ContextId,
        rows: usize,
        data: &'a [f32],
    },
    /// Backpropagate the output gradient `data` through `module` within `ctx`.
    Backward {
        module: ModuleId,
        ctx: ContextId,
        rows: usize,
        data: &'a [f32],
    },
    /// The resulting tensor of a forward or backward pass.
    Tensor { rows: usize, data: &'a [f32] },
    /// The flattened parameters of a module.
    Params(&'a [f32]),
}

/// The command for the `Control` variant of the `Msg` enum.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Join { rank: usize, name: String },
    CreateModule { module: ModuleId, spec: ModuleSpec },
    CreateOptimizer { module: ModuleId, spec: OptimizerSpec },
    ParameterInfo { module: ModuleId },
    ParameterCount { module: ModuleId, len: usize },
    PullParams { module: ModuleId },
    Step { module: ModuleId, ctx: ContextId },
    ReleaseContext { ctx: ContextId },
    Ack,
    Disconnect,
}

/// The application layer message for the entire system.
#[derive(Debug, Clone, PartialEq)]
pub enum Msg<'a> {
    Control(Command),
    Data(Payload<'a>),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    /// Builds an owned `Err` message out of anything displayable.
    pub fn err(e: impl Display) -> Self {
        Msg::Err(Cow::Owned(e.to_string()))
    }
}

fn invalid_data<T>(msg: impl Into<String>) -> io::Result<T> {
    Err(io::Error::new(io::ErrorKind::InvalidData, msg.into()))
}

fn take_u32(buf: &[u8]) -> io::Result<(u32, &[u8])> {
    match buf.split_first_chunk::<4>() {
        Some((head, rest)) => Ok((u32::from_be_bytes(*head), rest)),
        None => invalid_data(format!("expected 4 more bytes, got {}", buf.len())),
    }
}

fn take_u64(buf: &[u8]) -> io::Result<(u64, &[u8])> {
    match buf.split_first_chunk::<8>() {
        Some((head, rest)) => Ok((u64::from_be_bytes(*head), rest)),
        None => invalid_data(format!("expected 8 more bytes, got {}", buf.len())),
    }
}

fn floats(buf: &[u8]) -> io::Result<&[f32]> {
    bytemuck::try_cast_slice(buf).or_else(|e| invalid_data(format!("bad f32 payload: {e}")))
}

fn check_rows(rows: usize, data: &[f32]) -> io::Result<()> {
    if (rows == 0 && !data.is_empty()) || (rows != 0 && data.len() % rows != 0) {
        return invalid_data(format!(
            "a tensor of {} values can't be split in {rows} rows",
            data.len()
        ));
    }

    Ok(())
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL.to_be_bytes());
                serde_json::to_writer(&mut *buf, cmd)?;
                Ok(None)
            }
            Msg::Data(Payload::Forward {
                module,
                ctx,
                rows,
                data,
            })
            | Msg::Data(Payload::Backward {
                module,
                ctx,
                rows,
                data,
            }) => {
                let kind = match self {
                    Msg::Data(Payload::Forward { .. }) => FORWARD,
                    _ => BACKWARD,
                };

                buf.extend_from_slice(&kind.to_be_bytes());
                buf.extend_from_slice(&module.to_be_bytes());
                buf.extend_from_slice(&ctx.to_be_bytes());
                buf.extend_from_slice(&(*rows as u64).to_be_bytes());
                Ok(Some(bytemuck::cast_slice(data)))
            }
            Msg::Data(Payload::Tensor { rows, data }) => {
                buf.extend_from_slice(&TENSOR.to_be_bytes());
                buf.extend_from_slice(&(*rows as u64).to_be_bytes());
                Ok(Some(bytemuck::cast_slice(data)))
            }
            Msg::Data(Payload::Params(params)) => {
                buf.extend_from_slice(&PARAMS.to_be_bytes());
                Ok(Some(bytemuck::cast_slice(params)))
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return invalid_data(format!(
                "the given buffer is too small {}, must at least be {HEADER_SIZE} bytes",
                buf.len()
            ));
        }

        let (kind, rest) = take_u32(buf)?;

        match kind {
            ERR => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            FORWARD | BACKWARD => {
                let (module, rest) = take_u32(rest)?;
                let (ctx, rest) = take_u64(rest)?;
                let (rows, rest) = take_u64(rest)?;
                let rows = rows as usize;
                let data = floats(rest)?;
                check_rows(rows, data)?;

                let payload = if kind == FORWARD {
                    Payload::Forward {
                        module,
                        ctx,
                        rows,
                        data,
                    }
                } else {
                    Payload::Backward {
                        module,
                        ctx,
                        rows,
                        data,
                    }
                };

                Ok(Self::Data(payload))
            }
            TENSOR => {
                let (rows, rest) = take_u64(rest)?;
                let rows = rows as usize;
                let data = floats(rest)?;
                check_rows(rows, data)?;
                Ok(Self::Data(Payload::Tensor { rows, data }))
            }
            PARAMS => Ok(Self::Data(Payload::Params(floats(rest)?))),
            other => invalid_data(format!("received an invalid kind header {other}")),
        }
    }
}
