use anyhow::{bail, Result};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::net::{SocketAddr, UdpSocket};
use tracing::warn;

pub const FRAG_MAGIC: u8 = 0xfa;
const FRAG_FLAGS: u8 = 1;
pub const MAX_MESSAGE_SIZE: usize = 65536;
pub const MAX_UDP: usize = 1460;
const FRAG_INFO_SZ: usize = 5;
const MAX_FRAGMENT_PAYLOAD: usize = MAX_UDP - FRAG_INFO_SZ;

/// Header carried by every datagram: magic, flags, sequence, final flag, index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FragmentHeader {
    seq: u8,
    is_final: bool,
    index: u8,
}

impl FragmentHeader {
    fn parse(buf: &[u8]) -> Result<FragmentHeader> {
        if buf.len() < FRAG_INFO_SZ {
            bail!("too short message, len: {}", buf.len());
        }
        if buf[0] != FRAG_MAGIC {
            bail!("bad magic: {}", buf[0]);
        }
        if buf[1] != FRAG_FLAGS {
            bail!("unsupported flags: {}", buf[1]);
        }
        Ok(FragmentHeader {
            seq: buf[2],
            is_final: buf[3] != 0,
            index: buf[4],
        })
    }
}

/// A message being put back together for one sender.
struct Assembly {
    seq: u8,
    // A 64 KiB message never needs more than 46 fragments.
    received: u64,
    last: Option<(u8, usize)>,
    message: Vec<u8>,
}

impl Assembly {
    fn new(seq: u8) -> Assembly {
        Assembly {
            seq,
            received: 0,
            last: None,
            message: Vec::new(),
        }
    }

    fn is_complete(&self) -> bool {
        match self.last {
            Some((nfrag, _)) => {
                let all = if nfrag >= 64 { u64::MAX } else { (1u64 << nfrag) - 1 };
                self.received & all == all
            }
            None => false,
        }
    }
}

pub trait MessageHandler<T> {
    fn on_message(&mut self, src: SocketAddr, msg: T) -> Result<()>;
}

/// Reassembles fragmented protobuf messages arriving from many devices.
pub struct FragmentCombiner<T> {
    hosts: HashMap<SocketAddr, Assembly>,
    _message: PhantomData<T>,
}

impl<T: protobuf::Message> Default for FragmentCombiner<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: protobuf::Message> FragmentCombiner<T> {
    pub fn new() -> FragmentCombiner<T> {
        FragmentCombiner {
            hosts: HashMap::new(),
            _message: PhantomData,
        }
    }

    /// Receives datagrams forever, handing every complete message to `handler`.
    /// Malformed datagrams and handler failures are logged and skipped.
    pub fn run(&mut self, socket: &UdpSocket, handler: &mut dyn MessageHandler<T>) -> Result<()> {
        let mut buf = [0; MAX_UDP];
        loop {
            let (sz, src) = socket.recv_from(&mut buf)?;
            match self.add_fragment(src, &buf[..sz]) {
                Ok(Some(msg)) => {
                    if let Err(e) = handler.on_message(src, msg) {
                        warn!(%src, error = %e, "message handler failed");
                    }
                }
                Ok(None) => {}
                Err(e) => warn!(%src, error = %e, "dropping datagram"),
            }
        }
    }

    /// Feeds one datagram. Returns the decoded message once its last
    /// missing fragment has arrived.
    pub fn add_fragment(&mut self, src: SocketAddr, buf: &[u8]) -> Result<Option<T>> {
        let header = FragmentHeader::parse(buf)?;
        let payload = &buf[FRAG_INFO_SZ..];

        if !header.is_final && buf.len() != MAX_UDP {
            bail!("wrong packet size: {}", buf.len());
        }

        let begin = header.index as usize * MAX_FRAGMENT_PAYLOAD;
        let end = begin + payload.len();
        if end > MAX_MESSAGE_SIZE {
            bail!("message too large: {}", end);
        }

        let assembly = self
            .hosts
            .entry(src)
            .or_insert_with(|| Assembly::new(header.seq));
        if assembly.seq != header.seq {
            *assembly = Assembly::new(header.seq);
        }

        if assembly.message.len() < end {
            assembly.message.resize(end, 0);
        }
        assembly.message[begin..end].copy_from_slice(payload);
        assembly.received |= 1u64 << header.index;
        if header.is_final {
            assembly.last = Some((header.index + 1, end));
        }

        if !assembly.is_complete() {
            return Ok(None);
        }
        let Some(assembly) = self.hosts.remove(&src) else {
            return Ok(None);
        };
        let total = assembly.last.map_or(0, |(_, total)| total);
        Ok(Some(T::parse_from_bytes(&assembly.message[..total])?))
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    use super::*;
    use crate::protos::generated::dev::{DeviceMessage, ProbeReport, Sector};
    use protobuf::well_known_types::wrappers::BytesValue;
    use protobuf::Message;

    impl FragmentHeader {
        fn write(&self, out: &mut Vec<u8>) {
            out.extend_from_slice(&[
                FRAG_MAGIC,
                FRAG_FLAGS,
                self.seq,
                self.is_final as u8,
                self.index,
            ]);
        }
    }

    /// Splits an encoded message the way devices send it.
    fn fragment(seq: u8, message: &[u8]) -> Result<Vec<Vec<u8>>> {
        if message.len() > MAX_MESSAGE_SIZE {
            bail!("message too large: {}", message.len());
        }
        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&[][..]]
        } else {
            message.chunks(MAX_FRAGMENT_PAYLOAD).collect()
        };
        let count = chunks.len();
        Ok(chunks
            .into_iter()
            .enumerate()
            .map(|(index, chunk)| {
                let mut datagram = Vec::with_capacity(FRAG_INFO_SZ + chunk.len());
                FragmentHeader {
                    seq,
                    is_final: index + 1 == count,
                    index: index as u8,
                }
                .write(&mut datagram);
                datagram.extend_from_slice(chunk);
                datagram
            })
            .collect())
    }

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 5000)
    }

    fn probe_message() -> anyhow::Result<Vec<u8>> {
        let mut probe = ProbeReport::new();
        probe.set_sector(Sector::OVEN);
        probe.set_temperature_deci(1125);
        let mut d = DeviceMessage::new();
        d.probe = Some(probe).into();
        Ok(d.write_to_bytes()?)
    }

    #[test]
    fn single_fragment() -> anyhow::Result<()> {
        let mut f = FragmentCombiner::<DeviceMessage>::new();
        let datagrams = fragment(1, &probe_message()?)?;
        assert_eq!(datagrams.len(), 1);
        let msg = f.add_fragment(addr(), &datagrams[0])?.expect("complete");
        let probe = msg.probe.as_ref().expect("probe");
        assert_eq!(probe.sector(), Sector::OVEN);
        assert_eq!(probe.temperature_deci(), 1125);
        Ok(())
    }

    #[test]
    fn out_of_order_fragments() -> anyhow::Result<()> {
        let mut big = BytesValue::new();
        big.value = (0..4000u32).map(|i| (i % 251) as u8).collect();
        let datagrams = fragment(7, &big.write_to_bytes()?)?;
        assert_eq!(datagrams.len(), 3);

        let mut f = FragmentCombiner::<BytesValue>::new();
        assert!(f.add_fragment(addr(), &datagrams[2])?.is_none());
        assert!(f.add_fragment(addr(), &datagrams[0])?.is_none());
        // Duplicates must not count as new fragments.
        assert!(f.add_fragment(addr(), &datagrams[0])?.is_none());
        let msg = f.add_fragment(addr(), &datagrams[1])?.expect("complete");
        assert_eq!(msg.value, big.value);
        Ok(())
    }

    #[test]
    fn new_sequence_discards_partial_message() -> anyhow::Result<()> {
        let mut big = BytesValue::new();
        big.value = vec![3; 2000];
        let first = fragment(1, &big.write_to_bytes()?)?;
        let second = fragment(2, &probe_message()?)?;

        let mut f = FragmentCombiner::<BytesValue>::new();
        assert!(f.add_fragment(addr(), &first[0])?.is_none());
        // The stale final fragment of sequence 1 arrives after sequence 2 started.
        let _ = f.add_fragment(addr(), &second[0]);
        assert!(f.add_fragment(addr(), &first[1])?.is_none());
        Ok(())
    }

    #[test]
    fn bad_size() {
        let mut f = FragmentCombiner::<DeviceMessage>::new();
        assert!(f.add_fragment(addr(), &[FRAG_MAGIC]).is_err());
        // Non-final fragments must fill a whole datagram.
        assert!(f.add_fragment(addr(), &[FRAG_MAGIC, 1, 1, 0, 0, 42]).is_err());
    }

    #[test]
    fn bad_magic() {
        let mut f = FragmentCombiner::<DeviceMessage>::new();
        assert!(f.add_fragment(addr(), &[100, 1, 1, 1, 0]).is_err());
    }
}
