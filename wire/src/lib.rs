pub mod buffer;
pub mod packet;

pub use buffer::BytePacketBuffer;
pub use packet::{DnsClass, DnsPacket, Header, QueryType, Question, Record, ResponseCode};

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn should_round_trip_a_query_and_response() {
        let mut query = DnsPacket::new(Header::question(1));
        query
            .questions
            .push(Question::new("example.com".into(), QueryType::A));

        let buffer = query.create_buffer().unwrap();
        let parsed = DnsPacket::try_from(buffer.as_slice()).unwrap();
        assert_eq!(parsed.questions[0].name, "example.com");
        assert!(parsed.header.recursion_desired);

        let mut response = DnsPacket::new(Header::response_from(&parsed.header));
        response.questions = parsed.questions.clone();
        response.answers.push(Record::A {
            domain: "example.com".into(),
            addr: Ipv4Addr::new(93, 184, 216, 34),
            ttl: 60,
        });

        let response_buffer = response.create_buffer().unwrap();
        let parsed_response = DnsPacket::try_from(response_buffer.as_slice()).unwrap();
        assert!(parsed_response.header.response);
        assert!(parsed_response.header.recursion_available);
        assert_eq!(parsed_response.header.id, 1);
        assert_eq!(parsed_response.answers.len(), 1);
    }

    #[test]
    fn should_reject_truncated_message() {
        let error = DnsPacket::try_from(&b"short"[..]).unwrap_err();
        assert!(matches!(
            error,
            buffer::reader::ReaderError::MessageTooShort(5)
        ));
    }
}
