use super::QueryType;
use crate::buffer::reader::ReaderError;
use crate::buffer::writer::WriterError;
use crate::buffer::BytePacketBuffer;
use std::net::{Ipv4Addr, Ipv6Addr};

/// An answer/authority/additional resource record. Unknown record types
/// retain their raw rdata bytes and are echoed back unchanged, per the
/// wire codec contract.
#[derive(Debug, Clone, PartialEq, Eq)]
#[allow(clippy::upper_case_acronyms)]
pub enum Record {
    Unknown {
        domain: String,
        qtype: u16,
        data: Vec<u8>,
        ttl: u32,
    },
    A {
        domain: String,
        addr: Ipv4Addr,
        ttl: u32,
    },
    AAAA {
        domain: String,
        addr: Ipv6Addr,
        ttl: u32,
    },
    NS {
        domain: String,
        host: String,
        ttl: u32,
    },
    CNAME {
        domain: String,
        host: String,
        ttl: u32,
    },
    PTR {
        domain: String,
        host: String,
        ttl: u32,
    },
    MX {
        domain: String,
        priority: u16,
        host: String,
        ttl: u32,
    },
    TXT {
        domain: String,
        data: Vec<String>,
        ttl: u32,
    },
    SOA {
        domain: String,
        mname: String,
        rname: String,
        serial: u32,
        refresh: u32,
        retry: u32,
        expire: u32,
        minimum: u32,
        ttl: u32,
    },
}

impl Record {
    pub fn domain(&self) -> &str {
        match self {
            Self::Unknown { domain, .. }
            | Self::A { domain, .. }
            | Self::AAAA { domain, .. }
            | Self::NS { domain, .. }
            | Self::CNAME { domain, .. }
            | Self::PTR { domain, .. }
            | Self::MX { domain, .. }
            | Self::TXT { domain, .. }
            | Self::SOA { domain, .. } => domain,
        }
    }

    pub fn ttl(&self) -> u32 {
        match self {
            Self::Unknown { ttl, .. }
            | Self::A { ttl, .. }
            | Self::AAAA { ttl, .. }
            | Self::NS { ttl, .. }
            | Self::CNAME { ttl, .. }
            | Self::PTR { ttl, .. }
            | Self::MX { ttl, .. }
            | Self::TXT { ttl, .. }
            | Self::SOA { ttl, .. } => *ttl,
        }
    }

    /// Returns a copy of this record with its TTL rewritten, used when
    /// serving a cached response whose remaining lifetime has shrunk.
    pub fn with_ttl(&self, ttl: u32) -> Self {
        match self.clone() {
            Self::Unknown {
                domain,
                qtype,
                data,
                ..
            } => Self::Unknown {
                domain,
                qtype,
                data,
                ttl,
            },
            Self::A { domain, addr, .. } => Self::A { domain, addr, ttl },
            Self::AAAA { domain, addr, .. } => Self::AAAA { domain, addr, ttl },
            Self::NS { domain, host, .. } => Self::NS { domain, host, ttl },
            Self::CNAME { domain, host, .. } => Self::CNAME { domain, host, ttl },
            Self::PTR { domain, host, .. } => Self::PTR { domain, host, ttl },
            Self::MX {
                domain,
                priority,
                host,
                ..
            } => Self::MX {
                domain,
                priority,
                host,
                ttl,
            },
            Self::TXT { domain, data, .. } => Self::TXT { domain, data, ttl },
            Self::SOA {
                domain,
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ..
            } => Self::SOA {
                domain,
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ttl,
            },
        }
    }

    pub fn read(buffer: &mut BytePacketBuffer) -> Result<Record, ReaderError> {
        let domain = buffer.read_qname()?;

        let qtype_num = buffer.read_u16()?;
        let qtype = QueryType::from_num(qtype_num);

        let _qclass = buffer.read_u16()?;
        let ttl = buffer.read_u32()?;
        let data_len = buffer.read_u16()?;

        match qtype {
            QueryType::A => {
                let raw_addr = buffer.read_u32()?;
                let addr = Ipv4Addr::from(raw_addr);
                Ok(Record::A { domain, addr, ttl })
            }
            QueryType::AAAA => {
                let raw_addr1 = buffer.read_u32()?;
                let raw_addr2 = buffer.read_u32()?;
                let raw_addr3 = buffer.read_u32()?;
                let raw_addr4 = buffer.read_u32()?;
                let addr = Ipv6Addr::new(
                    ((raw_addr1 >> 16) & 0xFFFF) as u16,
                    (raw_addr1 & 0xFFFF) as u16,
                    ((raw_addr2 >> 16) & 0xFFFF) as u16,
                    (raw_addr2 & 0xFFFF) as u16,
                    ((raw_addr3 >> 16) & 0xFFFF) as u16,
                    (raw_addr3 & 0xFFFF) as u16,
                    ((raw_addr4 >> 16) & 0xFFFF) as u16,
                    (raw_addr4 & 0xFFFF) as u16,
                );
                Ok(Record::AAAA { domain, addr, ttl })
            }
            QueryType::NS => {
                let host = buffer.read_qname()?;
                Ok(Record::NS { domain, host, ttl })
            }
            QueryType::CNAME => {
                let host = buffer.read_qname()?;
                Ok(Record::CNAME { domain, host, ttl })
            }
            QueryType::PTR => {
                let host = buffer.read_qname()?;
                Ok(Record::PTR { domain, host, ttl })
            }
            QueryType::MX => {
                let priority = buffer.read_u16()?;
                let host = buffer.read_qname()?;
                Ok(Record::MX {
                    domain,
                    priority,
                    host,
                    ttl,
                })
            }
            QueryType::TXT => {
                let end = buffer.pos() + data_len as usize;
                let mut data = Vec::new();
                while buffer.pos() < end {
                    let len = buffer.read()? as usize;
                    let bytes = buffer.get_range(buffer.pos(), len)?;
                    data.push(String::from_utf8_lossy(bytes).into_owned());
                    buffer.step(len)?;
                }
                Ok(Record::TXT { domain, data, ttl })
            }
            QueryType::SOA => {
                let mname = buffer.read_qname()?;
                let rname = buffer.read_qname()?;
                let serial = buffer.read_u32()?;
                let refresh = buffer.read_u32()?;
                let retry = buffer.read_u32()?;
                let expire = buffer.read_u32()?;
                let minimum = buffer.read_u32()?;
                Ok(Record::SOA {
                    domain,
                    mname,
                    rname,
                    serial,
                    refresh,
                    retry,
                    expire,
                    minimum,
                    ttl,
                })
            }
            QueryType::Unknown(_) => {
                let data = buffer.get_range(buffer.pos(), data_len as usize)?.to_vec();
                buffer.step(data_len as usize)?;
                Ok(Record::Unknown {
                    domain,
                    qtype: qtype_num,
                    data,
                    ttl,
                })
            }
        }
    }

    pub fn write(&self, buffer: &mut BytePacketBuffer) -> Result<usize, WriterError> {
        let start_pos = buffer.pos();

        match self {
            Record::A { domain, addr, ttl } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::A.into_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(*ttl)?;
                buffer.write_u16(4)?;
                for octet in addr.octets() {
                    buffer.write_u8(octet)?;
                }
            }
            Record::AAAA { domain, addr, ttl } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::AAAA.into_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(*ttl)?;
                buffer.write_u16(16)?;
                for segment in addr.segments() {
                    buffer.write_u16(segment)?;
                }
            }
            Record::NS { domain, host, ttl } => {
                write_name_rdata(buffer, domain, QueryType::NS, *ttl, host)?;
            }
            Record::CNAME { domain, host, ttl } => {
                write_name_rdata(buffer, domain, QueryType::CNAME, *ttl, host)?;
            }
            Record::PTR { domain, host, ttl } => {
                write_name_rdata(buffer, domain, QueryType::PTR, *ttl, host)?;
            }
            Record::MX {
                domain,
                priority,
                host,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::MX.into_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(*ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_u16(*priority)?;
                buffer.write_qname(host)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            Record::TXT { domain, data, ttl } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::TXT.into_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(*ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;
                for chunk in data {
                    buffer.write_u8(chunk.len() as u8)?;
                    for b in chunk.as_bytes() {
                        buffer.write_u8(*b)?;
                    }
                }
                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            Record::SOA {
                domain,
                mname,
                rname,
                serial,
                refresh,
                retry,
                expire,
                minimum,
                ttl,
            } => {
                buffer.write_qname(domain)?;
                buffer.write_u16(QueryType::SOA.into_num())?;
                buffer.write_u16(1)?;
                buffer.write_u32(*ttl)?;

                let pos = buffer.pos();
                buffer.write_u16(0)?;

                buffer.write_qname(mname)?;
                buffer.write_qname(rname)?;
                buffer.write_u32(*serial)?;
                buffer.write_u32(*refresh)?;
                buffer.write_u32(*retry)?;
                buffer.write_u32(*expire)?;
                buffer.write_u32(*minimum)?;

                let size = buffer.pos() - (pos + 2);
                buffer.set_u16(pos, size as u16)?;
            }
            Record::Unknown { .. } => {
                // Echoed back unchanged by callers; nothing to do here since
                // the proxy never originates an Unknown record itself.
            }
        }

        Ok(buffer.pos() - start_pos)
    }
}

fn write_name_rdata(
    buffer: &mut BytePacketBuffer,
    domain: &str,
    qtype: QueryType,
    ttl: u32,
    host: &str,
) -> Result<(), WriterError> {
    buffer.write_qname(domain)?;
    buffer.write_u16(qtype.into_num())?;
    buffer.write_u16(1)?;
    buffer.write_u32(ttl)?;

    let pos = buffer.pos();
    buffer.write_u16(0)?;
    buffer.write_qname(host)?;

    let size = buffer.pos() - (pos + 2);
    buffer.set_u16(pos, size as u16)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_a_record() {
        let record = Record::A {
            domain: "example.com".into(),
            addr: Ipv4Addr::new(93, 184, 216, 34),
            ttl: 60,
        };
        let mut buffer = crate::buffer::BytePacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let read_back = Record::read(&mut buffer).unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn should_round_trip_txt_record() {
        let record = Record::TXT {
            domain: "example.com".into(),
            data: vec!["v=spf1".to_string(), "a".repeat(200)],
            ttl: 300,
        };
        let mut buffer = crate::buffer::BytePacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let read_back = Record::read(&mut buffer).unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn should_round_trip_soa_record() {
        let record = Record::SOA {
            domain: "example.com".into(),
            mname: "ns1.example.com".into(),
            rname: "hostmaster.example.com".into(),
            serial: 2024010100,
            refresh: 7200,
            retry: 3600,
            expire: 1209600,
            minimum: 300,
            ttl: 3600,
        };
        let mut buffer = crate::buffer::BytePacketBuffer::default();
        record.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let read_back = Record::read(&mut buffer).unwrap();
        assert_eq!(read_back, record);
    }

    #[test]
    fn should_preserve_unknown_rdata() {
        let mut buffer = crate::buffer::BytePacketBuffer::default();
        buffer.write_qname("example.com").unwrap();
        buffer.write_u16(999).unwrap();
        buffer.write_u16(1).unwrap();
        buffer.write_u32(10).unwrap();
        buffer.write_u16(3).unwrap();
        buffer.write_u8(1).unwrap();
        buffer.write_u8(2).unwrap();
        buffer.write_u8(3).unwrap();
        buffer.pos = 0;
        let record = Record::read(&mut buffer).unwrap();
        assert_eq!(
            record,
            Record::Unknown {
                domain: "example.com".into(),
                qtype: 999,
                data: vec![1, 2, 3],
                ttl: 10,
            }
        );
    }

    #[test]
    fn with_ttl_preserves_rdata() {
        let record = Record::A {
            domain: "example.com".into(),
            addr: Ipv4Addr::new(1, 2, 3, 4),
            ttl: 60,
        };
        let rewritten = record.with_ttl(12);
        assert_eq!(rewritten.ttl(), 12);
        assert_eq!(rewritten.domain(), "example.com");
    }
}
