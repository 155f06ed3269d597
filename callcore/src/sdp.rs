//! Session descriptions exchanged in `offer` and `answer` messages.
//!
//! The peer-connection strategy speaks a compact RFC 4566 subset: one bundled
//! transport, one m-line per track kind (audio/opus, video/VP8) and ICE
//! credentials derived from the session id so that offers and answers are
//! reproducible for a given track set.

use crate::error::NegotiationError;
use crate::types::{SessionId, TrackKind};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
}

impl SdpType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
        }
    }
}

/// Wire form of a session description (`RTCSessionDescriptionInit` shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaDirection {
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SendRecv => "sendrecv",
            Self::SendOnly => "sendonly",
            Self::RecvOnly => "recvonly",
            Self::Inactive => "inactive",
        }
    }

    /// Whether the side that wrote this direction sends media.
    pub fn sends(&self) -> bool {
        matches!(self, Self::SendRecv | Self::SendOnly)
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "sendrecv" => Some(Self::SendRecv),
            "sendonly" => Some(Self::SendOnly),
            "recvonly" => Some(Self::RecvOnly),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }

    /// The direction an answerer uses for an offered m-line.
    fn answer_to(offered: Self, we_send: bool) -> Self {
        let they_send = offered.sends();
        let we_may_send = matches!(offered, Self::SendRecv | Self::RecvOnly);
        match (we_send && we_may_send, they_send) {
            (true, true) => Self::SendRecv,
            (true, false) => Self::SendOnly,
            (false, true) => Self::RecvOnly,
            (false, false) => Self::Inactive,
        }
    }
}

/// Codec advertised for each track kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Codec {
    pub payload_type: u8,
    pub rtpmap: &'static str,
}

pub const OPUS: Codec = Codec {
    payload_type: 111,
    rtpmap: "opus/48000/2",
};

pub const VP8: Codec = Codec {
    payload_type: 96,
    rtpmap: "VP8/90000",
};

fn codec_for(kind: TrackKind) -> Codec {
    match kind {
        TrackKind::Audio => OPUS,
        TrackKind::Video => VP8,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSection {
    pub kind: TrackKind,
    pub mid: String,
    pub direction: MediaDirection,
    pub payload_type: u8,
    pub rtpmap: Option<String>,
}

/// Parsed/constructed session description body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdp {
    pub origin_id: u64,
    pub ice_ufrag: String,
    pub ice_pwd: String,
    pub sections: Vec<MediaSection>,
}

struct IceCredentials {
    ufrag: String,
    pwd: String,
    origin_id: u64,
}

fn derive_credentials(session_id: &SessionId, role: SdpType) -> IceCredentials {
    let mut hasher = Sha256::new();
    hasher.update(session_id.as_str().as_bytes());
    hasher.update(b":");
    hasher.update(role.as_str().as_bytes());
    let digest = hasher.finalize();

    let mut version = [0u8; 8];
    version.copy_from_slice(&digest[16..24]);

    IceCredentials {
        ufrag: hex::encode(&digest[0..4]),
        pwd: hex::encode(&digest[4..16]),
        origin_id: u64::from_be_bytes(version) >> 2,
    }
}

impl Sdp {
    /// Build the offer for the given local track kinds.
    pub fn offer(session_id: &SessionId, local_kinds: &[TrackKind]) -> Self {
        let creds = derive_credentials(session_id, SdpType::Offer);
        let mut kinds = local_kinds.to_vec();
        kinds.sort();
        kinds.dedup();

        let sections = kinds
            .into_iter()
            .enumerate()
            .map(|(idx, kind)| {
                let codec = codec_for(kind);
                MediaSection {
                    kind,
                    mid: idx.to_string(),
                    direction: MediaDirection::SendRecv,
                    payload_type: codec.payload_type,
                    rtpmap: Some(codec.rtpmap.to_string()),
                }
            })
            .collect();

        Self {
            origin_id: creds.origin_id,
            ice_ufrag: creds.ufrag,
            ice_pwd: creds.pwd,
            sections,
        }
    }

    /// Build the answer to `offer`. Only offered m-lines appear in the answer.
    pub fn answer(session_id: &SessionId, offer: &Sdp, local_kinds: &[TrackKind]) -> Self {
        let creds = derive_credentials(session_id, SdpType::Answer);
        let sections = offer
            .sections
            .iter()
            .map(|offered| MediaSection {
                kind: offered.kind,
                mid: offered.mid.clone(),
                direction: MediaDirection::answer_to(
                    offered.direction,
                    local_kinds.contains(&offered.kind),
                ),
                payload_type: offered.payload_type,
                rtpmap: offered.rtpmap.clone(),
            })
            .collect();

        Self {
            origin_id: creds.origin_id,
            ice_ufrag: creds.ufrag,
            ice_pwd: creds.pwd,
            sections,
        }
    }

    /// Kinds the author of this description will send.
    pub fn sending_kinds(&self) -> Vec<TrackKind> {
        self.sections
            .iter()
            .filter(|s| s.direction.sends())
            .map(|s| s.kind)
            .collect()
    }

    pub fn section(&self, kind: TrackKind) -> Option<&MediaSection> {
        self.sections.iter().find(|s| s.kind == kind)
    }

    pub fn parse(raw: &str) -> Result<Self, NegotiationError> {
        let mut lines = raw.lines().map(|l| l.trim_end_matches('\r')).filter(|l| !l.is_empty());

        if lines.next() != Some("v=0") {
            return Err(malformed("missing v=0"));
        }

        let mut origin_id = None;
        let mut ice_ufrag = None;
        let mut ice_pwd = None;
        let mut sections: Vec<MediaSection> = Vec::new();
        // Sections for media we do not model still consume their attributes.
        let mut in_unknown_section = false;

        for line in lines {
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| malformed(format!("bad line `{line}`")))?;

            match key {
                "o" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    if fields.len() != 6 {
                        return Err(malformed("bad origin line"));
                    }
                    origin_id = Some(
                        fields[1]
                            .parse::<u64>()
                            .map_err(|_| malformed("bad origin session id"))?,
                    );
                }
                "m" => {
                    let fields: Vec<&str> = value.split_whitespace().collect();
                    if fields.len() < 4 {
                        return Err(malformed(format!("bad media line `{line}`")));
                    }
                    match fields[0].parse::<TrackKind>() {
                        Ok(kind) => {
                            let payload_type = fields[3]
                                .parse::<u8>()
                                .map_err(|_| malformed("bad payload type"))?;
                            sections.push(MediaSection {
                                kind,
                                mid: sections.len().to_string(),
                                direction: MediaDirection::SendRecv,
                                payload_type,
                                rtpmap: None,
                            });
                            in_unknown_section = false;
                        }
                        Err(()) => in_unknown_section = true,
                    }
                }
                "a" => {
                    let (name, arg) = value.split_once(':').unwrap_or((value, ""));
                    match name {
                        "ice-ufrag" => ice_ufrag = Some(arg.to_string()),
                        "ice-pwd" => ice_pwd = Some(arg.to_string()),
                        _ if in_unknown_section => {}
                        "mid" => {
                            if let Some(section) = sections.last_mut() {
                                section.mid = arg.to_string();
                            }
                        }
                        "rtpmap" => {
                            if let Some(section) = sections.last_mut()
                                && let Some((pt, codec)) = arg.split_once(' ')
                                && pt.parse::<u8>().ok() == Some(section.payload_type)
                            {
                                section.rtpmap = Some(codec.to_string());
                            }
                        }
                        other => {
                            if let Some(direction) = MediaDirection::parse(other)
                                && let Some(section) = sections.last_mut()
                            {
                                section.direction = direction;
                            }
                        }
                    }
                }
                _ => {}
            }
        }

        let origin_id = origin_id.ok_or_else(|| malformed("missing origin"))?;
        if sections.is_empty() {
            return Err(malformed("no audio or video media sections"));
        }
        let ice_ufrag = ice_ufrag.ok_or_else(|| malformed("missing ice-ufrag"))?;
        let ice_pwd = ice_pwd.ok_or_else(|| malformed("missing ice-pwd"))?;

        Ok(Self {
            origin_id,
            ice_ufrag,
            ice_pwd,
            sections,
        })
    }
}

impl fmt::Display for Sdp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v=0\r\n")?;
        write!(f, "o=- {} 2 IN IP4 127.0.0.1\r\n", self.origin_id)?;
        write!(f, "s=-\r\n")?;
        write!(f, "t=0 0\r\n")?;
        let mids: Vec<&str> = self.sections.iter().map(|s| s.mid.as_str()).collect();
        write!(f, "a=group:BUNDLE {}\r\n", mids.join(" "))?;
        write!(f, "a=ice-ufrag:{}\r\n", self.ice_ufrag)?;
        write!(f, "a=ice-pwd:{}\r\n", self.ice_pwd)?;
        for section in &self.sections {
            write!(
                f,
                "m={} 9 UDP/TLS/RTP/SAVPF {}\r\n",
                section.kind, section.payload_type
            )?;
            write!(f, "c=IN IP4 0.0.0.0\r\n")?;
            write!(f, "a=mid:{}\r\n", section.mid)?;
            write!(f, "a={}\r\n", section.direction.as_str())?;
            if let Some(rtpmap) = &section.rtpmap {
                write!(f, "a=rtpmap:{} {}\r\n", section.payload_type, rtpmap)?;
            }
        }
        Ok(())
    }
}

fn malformed(reason: impl Into<String>) -> NegotiationError {
    NegotiationError::MalformedDescription(reason.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> SessionId {
        SessionId::new("AC90CFD09DF712D981142B172706F9F2")
    }

    #[test]
    fn test_offer_is_deterministic() {
        let a = Sdp::offer(&session(), &[TrackKind::Video, TrackKind::Audio]).to_string();
        let b = Sdp::offer(&session(), &[TrackKind::Audio, TrackKind::Video]).to_string();
        assert_eq!(a, b);
        assert!(a.contains("m=audio 9 UDP/TLS/RTP/SAVPF 111"));
        assert!(a.contains("a=rtpmap:96 VP8/90000"));

        let other = Sdp::offer(&SessionId::new("BC5BD1EDE9BBE601F408EF3795479E93"), &[TrackKind::Audio]);
        assert_ne!(other.ice_ufrag, Sdp::offer(&session(), &[TrackKind::Audio]).ice_ufrag);
    }

    #[test]
    fn test_offer_parses_back() {
        let offer = Sdp::offer(&session(), &[TrackKind::Audio, TrackKind::Video]);
        let parsed = Sdp::parse(&offer.to_string()).unwrap();
        assert_eq!(parsed, offer);
        assert_eq!(parsed.sending_kinds(), vec![TrackKind::Audio, TrackKind::Video]);
    }

    #[test]
    fn test_answer_audio_only_callee_to_video_offer() {
        let offer = Sdp::offer(&session(), &[TrackKind::Audio, TrackKind::Video]);
        let answer = Sdp::answer(&session(), &offer, &[TrackKind::Audio]);

        assert_eq!(answer.sections.len(), 2);
        assert_eq!(answer.section(TrackKind::Audio).unwrap().direction, MediaDirection::SendRecv);
        assert_eq!(answer.section(TrackKind::Video).unwrap().direction, MediaDirection::RecvOnly);
        assert_eq!(answer.sending_kinds(), vec![TrackKind::Audio]);
        assert_ne!(answer.ice_ufrag, offer.ice_ufrag);
    }

    #[test]
    fn test_answer_never_adds_unoffered_media() {
        let offer = Sdp::offer(&session(), &[TrackKind::Audio]);
        let answer = Sdp::answer(&session(), &offer, &[TrackKind::Audio, TrackKind::Video]);
        assert_eq!(answer.sections.len(), 1);
        assert!(answer.section(TrackKind::Video).is_none());
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            Sdp::parse("hello"),
            Err(NegotiationError::MalformedDescription(_))
        ));
        assert!(Sdp::parse("v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\n").is_err());

        let no_ice = "v=0\r\no=- 1 2 IN IP4 127.0.0.1\r\ns=-\r\nm=audio 9 UDP/TLS/RTP/SAVPF 111\r\n";
        assert!(Sdp::parse(no_ice).is_err());
    }

    #[test]
    fn test_parse_skips_unknown_media() {
        let raw = "v=0\no=- 7 2 IN IP4 127.0.0.1\ns=-\na=ice-ufrag:abcd\na=ice-pwd:0123456789abcdef01234567\n\
                   m=application 9 UDP/DTLS/SCTP webrtc-datachannel\na=mid:0\na=sendrecv\n\
                   m=audio 9 UDP/TLS/RTP/SAVPF 111\na=mid:1\na=recvonly\na=rtpmap:111 opus/48000/2\n";
        let sdp = Sdp::parse(raw).unwrap();
        assert_eq!(sdp.sections.len(), 1);
        assert_eq!(sdp.sections[0].mid, "1");
        assert_eq!(sdp.sections[0].direction, MediaDirection::RecvOnly);
        assert!(sdp.sending_kinds().is_empty());
    }

    #[test]
    fn test_description_json_shape() {
        let desc = SessionDescription::offer("v=0");
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["type"], "offer");
        assert_eq!(json["sdp"], "v=0");
    }
}
