//! Response framing: the little-endian packer and the job payload encoder.

use crate::crypt::SessionKeys;
use crate::protocol::{COMMAND_NOJOB, COMMAND_PIVOT, DEMON_PIVOT_SMB_COMMAND};

/// A queued unit of work for an agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemonJob {
    pub command: u32,
    pub payload: Vec<u8>,
}

impl DemonJob {
    pub fn new(command: u32, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            command,
            payload: payload.into(),
        }
    }

    /// The synthetic entry answering a poll with an empty queue.
    pub fn no_job() -> Self {
        Self::new(COMMAND_NOJOB, Vec::new())
    }

    /// Pivot job relaying a child SMB agent's traffic.
    pub fn is_smb_pivot(&self) -> bool {
        self.command == COMMAND_PIVOT && self.payload.first() == Some(&DEMON_PIVOT_SMB_COMMAND)
    }
}

/// Builds a response buffer, encrypted under the session keys on
/// [`Packer::build`].
#[derive(Debug)]
pub struct Packer {
    data: Vec<u8>,
    keys: SessionKeys,
}

impl Packer {
    pub fn new(keys: SessionKeys) -> Self {
        Self {
            data: Vec::new(),
            keys,
        }
    }

    #[must_use]
    pub fn add_u32(mut self, value: u32) -> Self {
        self.data.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Length-prefixed byte field.
    #[must_use]
    pub fn add_bytes(self, bytes: &[u8]) -> Self {
        let len = u32::try_from(bytes.len()).unwrap_or(u32::MAX);
        let mut packer = self.add_u32(len);
        packer.data.extend_from_slice(bytes);
        packer
    }

    pub fn build(self) -> Vec<u8> {
        let mut data = self.data;
        self.keys.apply(&mut data);
        data
    }
}

/// Frame an ordered job sequence into one encrypted response:
/// `command (u32 LE) | payload length (u32 LE) | payload` per job.
pub fn build_payload_message(jobs: &[DemonJob], keys: &SessionKeys) -> Vec<u8> {
    jobs.iter()
        .fold(Packer::new(*keys), |packer, job| {
            packer.add_u32(job.command).add_bytes(&job.payload)
        })
        .build()
}

/// Encode a request body the way an agent does: big-endian header
/// (`size | magic | agent id`), then the command and its payload.
pub fn encode_request(magic_value: u32, agent_id: u32, command: u32, payload: &[u8]) -> Vec<u8> {
    let size = u32::try_from(12 + payload.len()).unwrap_or(u32::MAX);
    let mut out = Vec::with_capacity(16 + payload.len());
    out.extend_from_slice(&size.to_be_bytes());
    out.extend_from_slice(&magic_value.to_be_bytes());
    out.extend_from_slice(&agent_id.to_be_bytes());
    out.extend_from_slice(&command.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::COMMAND_GET_JOB;

    fn keys() -> SessionKeys {
        SessionKeys::new([0x41; 32], [0x42; 16])
    }

    #[test]
    fn no_job_frame_is_command_and_zero_length() {
        let frame = build_payload_message(&[DemonJob::no_job()], &keys());
        let clear = keys().xcrypt(&frame);
        let mut expected = COMMAND_NOJOB.to_le_bytes().to_vec();
        expected.extend_from_slice(&0u32.to_le_bytes());
        assert_eq!(clear, expected);
    }

    #[test]
    fn frames_every_job_in_order() {
        let jobs = [
            DemonJob::new(COMMAND_GET_JOB, b"ab".to_vec()),
            DemonJob::new(COMMAND_PIVOT, vec![DEMON_PIVOT_SMB_COMMAND, 1]),
        ];
        let clear = keys().xcrypt(&build_payload_message(&jobs, &keys()));
        assert_eq!(clear.len(), (8 + 2) + (8 + 2));
        assert_eq!(&clear[..4], &COMMAND_GET_JOB.to_le_bytes());
        assert_eq!(&clear[10..14], &COMMAND_PIVOT.to_le_bytes());
    }

    #[test]
    fn smb_pivot_detection_needs_marker_as_first_byte() {
        assert!(DemonJob::new(COMMAND_PIVOT, vec![DEMON_PIVOT_SMB_COMMAND]).is_smb_pivot());
        assert!(!DemonJob::new(COMMAND_PIVOT, vec![1, DEMON_PIVOT_SMB_COMMAND]).is_smb_pivot());
        assert!(!DemonJob::new(COMMAND_PIVOT, Vec::new()).is_smb_pivot());
        assert!(!DemonJob::new(COMMAND_GET_JOB, vec![DEMON_PIVOT_SMB_COMMAND]).is_smb_pivot());
    }

    #[test]
    fn packed_id_decrypts_to_little_endian() {
        let packed = Packer::new(keys()).add_u32(0x0102_0304).build();
        assert_ne!(packed, vec![4, 3, 2, 1]);
        assert_eq!(keys().xcrypt(&packed), vec![4, 3, 2, 1]);
    }
}
