use crate::models::MeetingLink;
use lazy_static::lazy_static;
use regex::Regex;

pub mod logging;
pub mod retry;

/// FNV-1a over the input, starting from an arbitrary 32-bit basis. Different
/// basis values act as salts so two hashes of the same input stay independent.
pub fn fnv1a_32(input: &str, basis: u32) -> u32 {
    const PRIME: u32 = 16_777_619;
    let mut hash = basis;
    for byte in input.as_bytes() {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// 64-bit FNV-1a, used for feed content change detection.
pub fn fnv1a_64(input: &str) -> u64 {
    const BASIS: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut hash = BASIS;
    for byte in input.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Cooperative checkpoint: yields back to the scheduler every `every` ticks.
/// Keeps long scans from monopolizing the single-threaded host event loop.
pub struct Yielder {
    every: usize,
    count: usize,
}

impl Yielder {
    pub fn new(every: usize) -> Self {
        Self {
            every: every.max(1),
            count: 0,
        }
    }

    pub async fn tick(&mut self) {
        self.count += 1;
        if self.count % self.every == 0 {
            tokio::task::yield_now().await;
        }
    }
}

lazy_static! {
    // Ordered: first match wins, so the provider-specific patterns come
    // before the broader host matches.
    static ref MEETING_PATTERNS: Vec<(Regex, &'static str)> = vec![
        // Zoom
        (Regex::new(r"https://[^\s]*zoom\.us/j/\d+[^\s]*").unwrap(), "Zoom"),
        (Regex::new(r"https://[^\s]*zoom\.us/my/[^\s]+").unwrap(), "Zoom"),
        (Regex::new(r"https://[^\s]*zoom\.us/s/[^\s]+").unwrap(), "Zoom"),
        // Google Meet
        (Regex::new(r"https://meet\.google\.com/[a-z-]+").unwrap(), "Google Meet"),
        // Microsoft Teams
        (Regex::new(r"https://teams\.microsoft\.com/l/meetup-join/[^\s]+").unwrap(), "Teams"),
        (Regex::new(r"https://teams\.live\.com/[^\s]+").unwrap(), "Teams"),
        // Webex
        (Regex::new(r"https://[^\s]*webex\.com/[^\s]+").unwrap(), "Webex"),
        // Skype
        (Regex::new(r"https://join\.skype\.com/[^\s]+").unwrap(), "Skype"),
        // GoToMeeting
        (Regex::new(r"https://[^\s]*gotomeeting\.com/[^\s]+").unwrap(), "GoToMeeting"),
        // BlueJeans
        (Regex::new(r"https://[^\s]*bluejeans\.com/[^\s]+").unwrap(), "BlueJeans"),
        // RingCentral
        (Regex::new(r"https://[^\s]*ringcentral\.com/[^\s]+").unwrap(), "RingCentral"),
        // Whereby
        (Regex::new(r"https://[^\s]*whereby\.com/[^\s]+").unwrap(), "Whereby"),
        // Jitsi
        (Regex::new(r"https://meet\.jit\.si/[^\s]+").unwrap(), "Jitsi"),
        (Regex::new(r"https://[^\s]*jitsi\.org/[^\s]+").unwrap(), "Jitsi"),
    ];
}

/// Scan location, then description, then the explicit URL field for a known
/// video-conferencing link. First match wins; an event carrying several links
/// only surfaces one.
pub fn extract_meeting_link(
    location: Option<&str>,
    description: Option<&str>,
    url: Option<&str>,
) -> Option<MeetingLink> {
    for text in [location, description, url].into_iter().flatten() {
        for (pattern, provider) in MEETING_PATTERNS.iter() {
            if let Some(found) = pattern.find(text) {
                return Some(MeetingLink {
                    provider: (*provider).to_string(),
                    url: found.as_str().to_string(),
                });
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fnv1a_32_deterministic() {
        let a = fnv1a_32("some-uid@google.com", 0x811c_9dc5);
        let b = fnv1a_32("some-uid@google.com", 0x811c_9dc5);
        assert_eq!(a, b);
        // A different basis must give an independent hash.
        let c = fnv1a_32("some-uid@google.com", 0x0100_0193);
        assert_ne!(a, c);
    }

    #[test]
    fn test_fnv1a_64_known_vector() {
        // Standard FNV-1a test vector: empty input hashes to the offset basis.
        assert_eq!(fnv1a_64(""), 0xcbf2_9ce4_8422_2325);
        assert_ne!(fnv1a_64("BEGIN:VCALENDAR"), fnv1a_64("BEGIN:VCALENDAR "));
    }

    #[test]
    fn test_extract_zoom_link() {
        let result = extract_meeting_link(
            Some("https://us02.zoom.us/j/123456789"),
            Some("Join us for weekly sync"),
            None,
        );
        let link = result.unwrap();
        assert_eq!(link.provider, "Zoom");
        assert_eq!(link.url, "https://us02.zoom.us/j/123456789");
    }

    #[test]
    fn test_extract_google_meet_from_description() {
        let result = extract_meeting_link(
            Some("Conference Room A"),
            Some("Meeting link: https://meet.google.com/abc-def-xyz"),
            None,
        );
        assert_eq!(result.unwrap().provider, "Google Meet");
    }

    #[test]
    fn test_location_wins_over_description() {
        let result = extract_meeting_link(
            Some("https://meet.google.com/aaa-bbb-ccc"),
            Some("https://us02.zoom.us/j/999"),
            None,
        );
        assert_eq!(result.unwrap().provider, "Google Meet");
    }

    #[test]
    fn test_url_field_checked_last() {
        let result = extract_meeting_link(
            Some("Room 4"),
            Some("agenda attached"),
            Some("https://teams.microsoft.com/l/meetup-join/19%3ameeting"),
        );
        assert_eq!(result.unwrap().provider, "Teams");
    }

    #[test]
    fn test_no_meeting_link() {
        let result = extract_meeting_link(
            Some("Conference Room A"),
            Some("Regular team meeting, see https://example.com/agenda"),
            None,
        );
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_yielder_counts() {
        let mut yielder = Yielder::new(3);
        // Just exercising the suspension point; correctness is that it returns.
        for _ in 0..10 {
            yielder.tick().await;
        }
    }
}
