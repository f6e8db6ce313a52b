use serde_json::json;

/// One of the seven fixed daily teaching slots shared by the whole school.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub id: i64,
    pub time: &'static str,
    pub is_morning: bool,
}

pub const SESSIONS: [Session; 7] = [
    Session { id: 1, time: "08:00 - 09:00", is_morning: true },
    Session { id: 2, time: "09:00 - 10:00", is_morning: true },
    Session { id: 3, time: "10:00 - 11:00", is_morning: true },
    Session { id: 4, time: "11:00 - 12:00", is_morning: true },
    Session { id: 5, time: "13:00 - 14:00", is_morning: false },
    Session { id: 6, time: "14:00 - 15:00", is_morning: false },
    Session { id: 7, time: "15:00 - 16:00", is_morning: false },
];

/// Teaching week runs Sunday through Thursday.
pub const DAYS_OF_WEEK: [&str; 5] = ["Sunday", "Monday", "Tuesday", "Wednesday", "Thursday"];

pub fn session_exists(id: i64) -> bool {
    SESSIONS.iter().any(|s| s.id == id)
}

pub fn day_is_valid(day: &str) -> bool {
    DAYS_OF_WEEK.iter().any(|d| *d == day)
}

pub fn sessions_json() -> Vec<serde_json::Value> {
    SESSIONS
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "time": s.time,
                "isMorning": s.is_morning
            })
        })
        .collect()
}

pub fn days_json() -> Vec<serde_json::Value> {
    DAYS_OF_WEEK.iter().map(|d| json!(d)).collect()
}
