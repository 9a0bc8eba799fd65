//! Wire codecs for the messages the dispatcher moves over the rings.
//!
//! The ring layer carries opaque bytes; these encodings are the contract
//! between the kernel-side dispatcher and module workers. Format: one tag
//! byte, little-endian scalars, and u32-length-prefixed byte/string fields.

use thiserror::Error;

const TAG_JOB: u8 = 0x01;
const TAG_REPLY_DONE: u8 = 0x02;
const TAG_REPLY_FAILED: u8 = 0x03;
const TAG_MESH_EVENT: u8 = 0x04;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown message tag")]
    UnknownTag,
    #[error("message truncated")]
    Truncated,
}

/// A unit of work routed to a compute worker: `(library, method, params,
/// input?)`, correlated to its reply by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: u64,
    pub library: String,
    pub method: String,
    pub params: Vec<u8>,
    pub input: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobReply {
    Done { id: u64, output: Vec<u8> },
    Failed { id: u64, reason: String },
}

impl JobReply {
    pub fn id(&self) -> u64 {
        match self {
            JobReply::Done { id, .. } | JobReply::Failed { id, .. } => *id,
        }
    }
}

/// A mesh event as the kernel publishes it to the host renderer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeshEvent {
    pub kind: u32,
    pub body: Vec<u8>,
}

struct Writer(Vec<u8>);

impl Writer {
    fn new(tag: u8) -> Writer {
        Writer(vec![tag])
    }

    fn u8(&mut self, v: u8) {
        self.0.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.0.extend_from_slice(v);
    }

    fn str(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }

    fn finish(self) -> Vec<u8> {
        self.0
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        let end = self.pos.checked_add(n).ok_or(DecodeError::Truncated)?;
        if end > self.buf.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, DecodeError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, DecodeError> {
        Ok(u32::from_le_bytes(
            self.take(4)?.try_into().expect("fixed width"),
        ))
    }

    fn u64(&mut self) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(
            self.take(8)?.try_into().expect("fixed width"),
        ))
    }

    fn bytes(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn str(&mut self) -> Result<String, DecodeError> {
        String::from_utf8(self.bytes()?).map_err(|_| DecodeError::Truncated)
    }

    fn done(&self) -> Result<(), DecodeError> {
        if self.pos == self.buf.len() {
            Ok(())
        } else {
            Err(DecodeError::Truncated)
        }
    }
}

pub fn encode_job(job: &Job) -> Vec<u8> {
    let mut w = Writer::new(TAG_JOB);
    w.u64(job.id);
    w.str(&job.library);
    w.str(&job.method);
    w.bytes(&job.params);
    match &job.input {
        Some(input) => {
            w.u8(1);
            w.bytes(input);
        }
        None => w.u8(0),
    }
    w.finish()
}

pub fn decode_job(buf: &[u8]) -> Result<Job, DecodeError> {
    let mut r = Reader::new(buf);
    if r.u8()? != TAG_JOB {
        return Err(DecodeError::UnknownTag);
    }
    let id = r.u64()?;
    let library = r.str()?;
    let method = r.str()?;
    let params = r.bytes()?;
    let input = match r.u8()? {
        0 => None,
        1 => Some(r.bytes()?),
        _ => return Err(DecodeError::UnknownTag),
    };
    r.done()?;
    Ok(Job {
        id,
        library,
        method,
        params,
        input,
    })
}

pub fn encode_job_reply(reply: &JobReply) -> Vec<u8> {
    match reply {
        JobReply::Done { id, output } => {
            let mut w = Writer::new(TAG_REPLY_DONE);
            w.u64(*id);
            w.bytes(output);
            w.finish()
        }
        JobReply::Failed { id, reason } => {
            let mut w = Writer::new(TAG_REPLY_FAILED);
            w.u64(*id);
            w.str(reason);
            w.finish()
        }
    }
}

pub fn decode_job_reply(buf: &[u8]) -> Result<JobReply, DecodeError> {
    let mut r = Reader::new(buf);
    let reply = match r.u8()? {
        TAG_REPLY_DONE => JobReply::Done {
            id: r.u64()?,
            output: r.bytes()?,
        },
        TAG_REPLY_FAILED => JobReply::Failed {
            id: r.u64()?,
            reason: r.str()?,
        },
        _ => return Err(DecodeError::UnknownTag),
    };
    r.done()?;
    Ok(reply)
}

pub fn encode_mesh_event(event: &MeshEvent) -> Vec<u8> {
    let mut w = Writer::new(TAG_MESH_EVENT);
    w.u32(event.kind);
    w.bytes(&event.body);
    w.finish()
}

pub fn decode_mesh_event(buf: &[u8]) -> Result<MeshEvent, DecodeError> {
    let mut r = Reader::new(buf);
    if r.u8()? != TAG_MESH_EVENT {
        return Err(DecodeError::UnknownTag);
    }
    let kind = r.u32()?;
    let body = r.bytes()?;
    r.done()?;
    Ok(MeshEvent { kind, body })
}
