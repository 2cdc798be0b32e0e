//! Classifies raw server log lines into the few events the orchestrator
//! cares about. Stateless; unmatched lines yield `None` and are echoed
//! untouched by the supervisor.

use once_cell::sync::Lazy;
use regex::Regex;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    Ready,
    PlayerJoined(String),
    PlayerLeft(String),
}

static READY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\[[^\]]*/INFO\] \[minecraft/DedicatedServer\]: Done \([\d.]+s\)!").unwrap()
});
static JOINED: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]: (\S+) joined the game$").unwrap());
static LEFT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\]: (\S+) left the game$").unwrap());
static LOST_CONNECTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\]: (\S+) lost connection: ").unwrap());

pub fn classify(line: &str) -> Option<ServerEvent> {
    if READY.is_match(line) {
        return Some(ServerEvent::Ready);
    }
    if let Some(caps) = JOINED.captures(line) {
        return Some(ServerEvent::PlayerJoined(caps[1].to_string()));
    }
    if let Some(caps) = LEFT.captures(line) {
        return Some(ServerEvent::PlayerLeft(caps[1].to_string()));
    }
    if let Some(caps) = LOST_CONNECTION.captures(line) {
        return Some(ServerEvent::PlayerLeft(caps[1].to_string()));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_line_is_detected() {
        let line = r#"[12:34:56] [Server thread/INFO] [minecraft/DedicatedServer]: Done (12.345s)! For help, type "help""#;
        assert_eq!(classify(line), Some(ServerEvent::Ready));
    }

    #[test]
    fn join_line_captures_the_player_name() {
        let line = "[12:35:01] [Server thread/INFO] [minecraft/MinecraftServer]: Steve joined the game";
        assert_eq!(
            classify(line),
            Some(ServerEvent::PlayerJoined("Steve".to_string()))
        );
    }

    #[test]
    fn left_and_lost_connection_both_classify_as_leave() {
        let left = "[12:40:00] [Server thread/INFO] [minecraft/MinecraftServer]: Alex left the game";
        assert_eq!(
            classify(left),
            Some(ServerEvent::PlayerLeft("Alex".to_string()))
        );

        let lost = "[12:40:00] [Server thread/INFO] [minecraft/DedicatedServer]: Alex lost connection: Disconnected";
        assert_eq!(
            classify(lost),
            Some(ServerEvent::PlayerLeft("Alex".to_string()))
        );
    }

    #[test]
    fn chatter_is_ignored() {
        assert_eq!(classify("[12:36:00] [Server thread/INFO]: <Steve> hello"), None);
        assert_eq!(classify("Steve joined the game later than expected"), None);
        assert_eq!(classify(""), None);
    }
}
