//! Offer post-processing for the Opus capture track.

use regex::Regex;

const FMTP_DEFAULTS: &str = "minptime=10;useinbandfec=1";
const FMTP_STEREO: &str =
    "minptime=10; useinbandfec=1; maxaveragebitrate=128000; stereo=1; sprop-stereo=1";

/// Raises the Opus target bitrate, forces stereo and pins the packetization
/// time right after the 48 kHz stereo rtpmap line. Only the first match of
/// each is rewritten.
pub fn munge_offer(sdp: &str) -> String {
    let sdp = sdp.replacen(FMTP_DEFAULTS, FMTP_STEREO, 1);
    match Regex::new(r"(a=rtpmap:\d+ opus/48000/2.*\r?\n)") {
        Ok(re) => re
            .replacen(&sdp, 1, "${1}a=ptime:20\r\na=maxptime:60\r\n")
            .into_owned(),
        Err(_) => sdp,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OFFER: &str = "v=0\r\n\
        m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
        a=rtpmap:111 opus/48000/2\r\n\
        a=fmtp:111 minptime=10;useinbandfec=1\r\n";

    #[test]
    fn enables_stereo_and_bitrate() {
        let out = munge_offer(OFFER);
        assert!(out.contains(
            "a=fmtp:111 minptime=10; useinbandfec=1; maxaveragebitrate=128000; stereo=1; sprop-stereo=1\r\n"
        ));
    }

    #[test]
    fn inserts_ptime_after_the_opus_rtpmap() {
        let out = munge_offer(OFFER);
        assert!(out.contains("a=rtpmap:111 opus/48000/2\r\na=ptime:20\r\na=maxptime:60\r\na=fmtp:111"));
    }

    #[test]
    fn leaves_other_codecs_alone() {
        let sdp = "a=rtpmap:0 PCMU/8000\r\n";
        assert_eq!(munge_offer(sdp), sdp);
    }
}
