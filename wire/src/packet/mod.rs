mod header;
mod question;
mod record;

pub use header::{Header, ResponseCode};
pub use question::{DnsClass, Question};
pub use record::Record;

use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::BytePacketBuffer;

/// Minimum length of any well-formed DNS message: the fixed 12-byte header.
pub const MIN_MESSAGE_LEN: usize = 12;

/// The RR types this proxy understands on the wire. Anything else is kept
/// as [`QueryType::Unknown`] and its rdata passed through untouched.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum QueryType {
    Unknown(u16),
    A,
    NS,
    CNAME,
    SOA,
    PTR,
    MX,
    TXT,
    AAAA,
}

impl QueryType {
    pub fn into_num(self) -> u16 {
        match self {
            QueryType::Unknown(x) => x,
            QueryType::A => 1,
            QueryType::NS => 2,
            QueryType::CNAME => 5,
            QueryType::SOA => 6,
            QueryType::PTR => 12,
            QueryType::MX => 15,
            QueryType::TXT => 16,
            QueryType::AAAA => 28,
        }
    }

    pub fn from_num(num: u16) -> QueryType {
        match num {
            1 => QueryType::A,
            2 => QueryType::NS,
            5 => QueryType::CNAME,
            6 => QueryType::SOA,
            12 => QueryType::PTR,
            15 => QueryType::MX,
            16 => QueryType::TXT,
            28 => QueryType::AAAA,
            other => QueryType::Unknown(other),
        }
    }
}

/// A fully parsed DNS message: header, question section and the three
/// record sections (answer, authority, additional).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsPacket {
    pub header: Header,
    pub questions: Vec<Question>,
    pub answers: Vec<Record>,
    pub authorities: Vec<Record>,
    pub resources: Vec<Record>,
}

impl DnsPacket {
    pub fn new(header: Header) -> Self {
        Self {
            header,
            questions: Vec::new(),
            answers: Vec::new(),
            authorities: Vec::new(),
            resources: Vec::new(),
        }
    }

    /// Recomputes the header's section counts from the vectors actually
    /// held and serializes the full message.
    pub fn create_buffer(&self) -> Result<BytePacketBuffer, WriterError> {
        let mut buffer = BytePacketBuffer::default();

        let mut header = self.header.clone();
        header.questions = self.questions.len() as u16;
        header.answers = self.answers.len() as u16;
        header.authoritative_entries = self.authorities.len() as u16;
        header.resource_entries = self.resources.len() as u16;
        header.write(&mut buffer)?;

        for question in &self.questions {
            question.write(&mut buffer)?;
        }
        for record in &self.answers {
            record.write(&mut buffer)?;
        }
        for record in &self.authorities {
            record.write(&mut buffer)?;
        }
        for record in &self.resources {
            record.write(&mut buffer)?;
        }

        Ok(buffer)
    }
}

impl TryFrom<&[u8]> for DnsPacket {
    type Error = ReaderError;

    fn try_from(data: &[u8]) -> Result<Self, Self::Error> {
        if data.len() < MIN_MESSAGE_LEN {
            return Err(ReaderError::MessageTooShort(data.len()));
        }
        DnsPacket::try_from(BytePacketBuffer::from_bytes(data))
    }
}

impl TryFrom<BytePacketBuffer> for DnsPacket {
    type Error = ReaderError;

    fn try_from(mut buffer: BytePacketBuffer) -> Result<Self, Self::Error> {
        let header = Header::read(&mut buffer)?;
        let mut packet = DnsPacket::new(header);

        for _ in 0..packet.header.questions {
            packet.questions.push(Question::read(&mut buffer)?);
        }
        for _ in 0..packet.header.answers {
            packet.answers.push(Record::read(&mut buffer)?);
        }
        for _ in 0..packet.header.authoritative_entries {
            packet.authorities.push(Record::read(&mut buffer)?);
        }
        for _ in 0..packet.header.resource_entries {
            packet.resources.push(Record::read(&mut buffer)?);
        }

        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn sample_packet() -> DnsPacket {
        let mut header = Header::question(0xBEEF);
        header.response = true;
        header.recursion_available = true;

        let mut packet = DnsPacket::new(header);
        packet
            .questions
            .push(Question::new("example.com".into(), QueryType::A));
        packet.answers.push(Record::A {
            domain: "example.com".into(),
            addr: Ipv4Addr::new(93, 184, 216, 34),
            ttl: 60,
        });
        packet
    }

    #[test]
    fn should_round_trip_full_packet() {
        let packet = sample_packet();
        let buffer = packet.create_buffer().unwrap();
        let read_back = DnsPacket::try_from(buffer.as_slice()).unwrap();
        assert_eq!(read_back, packet);
    }

    #[test]
    fn should_reject_messages_shorter_than_header() {
        let error = DnsPacket::try_from(&[0u8; 4][..]).unwrap_err();
        assert_eq!(error, ReaderError::MessageTooShort(4));
    }

    #[test]
    fn should_recompute_counts_from_vectors() {
        let packet = sample_packet();
        let buffer = packet.create_buffer().unwrap();
        assert_eq!(buffer.buf[4..6], [0, 1]);
        assert_eq!(buffer.buf[6..8], [0, 1]);
    }
}
