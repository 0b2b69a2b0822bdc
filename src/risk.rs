//! Behavioural risk scoring: maps client-supplied fingerprint, pointer
//! trajectory, and interaction-timing telemetry to a confidence score used
//! both to gate verification and to size the proof-of-work difficulty.

use crate::config::DifficultyTable;
use std::collections::BTreeMap;

const MAX_TRAJECTORY_POINTS: usize = 600;

#[derive(Clone, Debug, Default)]
pub struct Fingerprint {
    pub user_agent: Option<String>,
    pub screen_resolution: Option<String>,
    pub webdriver: bool,
    pub timezone_name: Option<String>,
    pub canvas_fingerprint: Option<String>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TrajectoryPoint {
    pub timestamp: i64,
    pub value: f64,
    pub delta: f64,
    pub velocity: f64,
    pub time_delta_ms: u32,
}

/// Parses raw trajectory samples, capping at 600 and silently dropping
/// anything malformed rather than rejecting the whole challenge.
pub fn parse_trajectory(raw: &[TrajectoryPoint]) -> Vec<TrajectoryPoint> {
    raw.iter().take(MAX_TRAJECTORY_POINTS).copied().collect()
}

#[derive(Clone, Debug, Default)]
pub struct BehaviorSummary {
    pub start_time: i64,
    pub end_time: i64,
    pub total_duration_ms: i64,
    pub event_count: i64,
    pub mouse_down_count: i64,
    pub mouse_move_count: i64,
    /// Raw ordered event log, carried through untouched. Never read by
    /// `analyze_bot_risk` — summary fields above are the scored signal.
    pub events: Vec<BTreeMap<String, String>>,
}

#[derive(Clone, Debug, Default)]
pub struct Telemetry {
    pub fingerprint: Option<Fingerprint>,
    pub trajectory: Option<Vec<TrajectoryPoint>>,
    pub behavior: Option<BehaviorSummary>,
}

#[derive(Clone, Debug)]
pub struct RiskAnalysis {
    pub is_bot: bool,
    pub confidence_score: i32,
    pub flags: Vec<&'static str>,
    pub fingerprint_present: bool,
    pub trajectory_points: usize,
    pub total_duration_ms: i64,
    pub movement_events: i64,
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn variance(values: &[f64], mean_value: f64) -> f64 {
    values.iter().map(|v| (v - mean_value).powi(2)).sum::<f64>() / values.len() as f64
}

/// Scores telemetry into a 0-100 confidence value; a session is classified a
/// bot below 60. Independently accumulates one flag per triggered rule.
pub fn analyze_bot_risk(telemetry: &Telemetry) -> RiskAnalysis {
    let mut flags: Vec<&'static str> = Vec::new();
    let mut score: i32 = 100;

    match &telemetry.fingerprint {
        Some(fp) => {
            let user_agent = fp.user_agent.clone().unwrap_or_default();
            if user_agent.len() < 20 {
                flags.push("suspicious_user_agent");
                score -= 20;
            }

            let valid_resolution = fp
                .screen_resolution
                .as_deref()
                .and_then(parse_resolution)
                .map(|(w, h)| w > 0 && h > 0)
                .unwrap_or(false);
            if !valid_resolution {
                flags.push("invalid_screen_resolution");
                score -= 15;
            }

            if fp.webdriver {
                flags.push("webdriver_detected");
                score -= 35;
            }

            if fp.timezone_name.as_deref().unwrap_or("").is_empty() {
                flags.push("missing_timezone");
                score -= 5;
            }

            if fp.canvas_fingerprint.as_deref().unwrap_or("").is_empty() {
                flags.push("missing_canvas_fingerprint");
                score -= 10;
            }
        }
        None => {
            flags.push("missing_fingerprint");
            score -= 30;
        }
    }

    let trajectory = telemetry.trajectory.as_deref().unwrap_or(&[]);
    if trajectory.len() >= 4 {
        let velocities: Vec<f64> = trajectory
            .iter()
            .filter(|p| p.time_delta_ms > 0)
            .map(|p| p.velocity)
            .collect();
        if !velocities.is_empty() {
            let vel_mean = mean(&velocities);
            if variance(&velocities, vel_mean) < 0.003 {
                flags.push("linear_velocity_pattern");
                score -= 20;
            }
        }

        let non_zero_deltas: Vec<f64> = trajectory
            .iter()
            .filter(|p| p.delta != 0.0)
            .map(|p| p.delta.abs())
            .collect();
        if !non_zero_deltas.is_empty() {
            let delta_mean = mean(&non_zero_deltas);
            if variance(&non_zero_deltas, delta_mean) < 0.2 && non_zero_deltas.len() >= 4 {
                flags.push("uniform_delta_pattern");
                score -= 15;
            }
        }

        let unique_values: std::collections::HashSet<i64> =
            trajectory.iter().map(|p| p.value as i64).collect();
        if unique_values.len() < 4 {
            flags.push("low_slider_entropy");
            score -= 15;
        }

        let time_deltas: Vec<u32> = trajectory
            .iter()
            .filter(|p| p.time_delta_ms > 0)
            .map(|p| p.time_delta_ms)
            .collect();
        if !time_deltas.is_empty() && !time_deltas.iter().any(|&d| d >= 120) {
            flags.push("no_movement_pauses");
            score -= 15;
        }
    } else {
        flags.push("insufficient_trajectory_data");
        score -= 30;
    }

    match &telemetry.behavior {
        Some(b) => {
            let duration = b.total_duration_ms;
            if duration <= 0 {
                flags.push("invalid_behavior_duration");
                score -= 20;
            } else if duration < 300 {
                flags.push("suspiciously_fast");
                score -= 25;
            } else if duration < 700 {
                flags.push("very_fast");
                score -= 10;
            } else if duration > 45_000 {
                flags.push("suspiciously_slow");
                score -= 10;
            }

            if b.mouse_down_count < 1 {
                flags.push("missing_mousedown");
                score -= 10;
            }

            if b.mouse_move_count < 3 {
                flags.push("insufficient_mouse_movement");
                score -= 20;
            } else if b.mouse_move_count < 8 {
                flags.push("limited_mouse_movement");
                score -= 10;
            }

            if b.event_count < 3 {
                flags.push("low_event_count");
                score -= 10;
            }
        }
        None => {
            flags.push("missing_behavior_data");
            score -= 25;
        }
    }

    let score = score.clamp(0, 100);
    RiskAnalysis {
        is_bot: score < 60,
        confidence_score: score,
        flags,
        fingerprint_present: telemetry.fingerprint.is_some(),
        trajectory_points: trajectory.len(),
        total_duration_ms: telemetry.behavior.as_ref().map(|b| b.total_duration_ms).unwrap_or(0),
        movement_events: telemetry.behavior.as_ref().map(|b| b.mouse_move_count).unwrap_or(0),
    }
}

fn parse_resolution(raw: &str) -> Option<(i64, i64)> {
    let (w, h) = raw.to_lowercase().split_once('x')?;
    Some((w.trim().parse().ok()?, h.trim().parse().ok()?))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        }
    }
}

pub struct DifficultyDecision {
    pub difficulty: u32,
    pub risk_level: RiskLevel,
    pub score: i32,
    pub flags: Vec<&'static str>,
}

/// Maps telemetry straight to a PoW difficulty tier using the same scoring
/// pipeline as verification.
pub fn compute_pow_difficulty(telemetry: &Telemetry, table: &DifficultyTable) -> DifficultyDecision {
    let analysis = analyze_bot_risk(telemetry);
    let (risk_level, difficulty) = if analysis.confidence_score >= 70 {
        (RiskLevel::Low, table.low)
    } else if analysis.confidence_score >= 40 {
        (RiskLevel::Medium, table.medium)
    } else {
        (RiskLevel::High, table.high)
    };

    DifficultyDecision {
        difficulty,
        risk_level,
        score: analysis.confidence_score,
        flags: analysis.flags,
    }
}

/// Debug-only detail map mirroring the original implementation's response
/// shape, useful for adapters that want to surface a `details` object.
pub fn analysis_details(analysis: &RiskAnalysis) -> BTreeMap<&'static str, i64> {
    let mut map = BTreeMap::new();
    map.insert("fingerprint_present", analysis.fingerprint_present as i64);
    map.insert("trajectory_points", analysis.trajectory_points as i64);
    map.insert("total_duration_ms", analysis.total_duration_ms);
    map.insert("movement_events", analysis.movement_events);
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    fn realistic_telemetry() -> Telemetry {
        let trajectory: Vec<TrajectoryPoint> = (0..20)
            .map(|i| TrajectoryPoint {
                timestamp: i * 50,
                value: (i as f64) * 5.0,
                delta: if i % 3 == 0 { 5.0 } else { 3.0 },
                velocity: 0.1 + (i as f64 % 4.0) * 0.05,
                time_delta_ms: if i == 5 { 150 } else { 50 },
            })
            .collect();

        Telemetry {
            fingerprint: Some(Fingerprint {
                user_agent: Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64)".into()),
                screen_resolution: Some("1920x1080".into()),
                webdriver: false,
                timezone_name: Some("Europe/Berlin".into()),
                canvas_fingerprint: Some("abc123".into()),
            }),
            trajectory: Some(trajectory),
            behavior: Some(BehaviorSummary {
                start_time: 0,
                end_time: 2500,
                total_duration_ms: 2500,
                event_count: 18,
                mouse_down_count: 1,
                mouse_move_count: 15,
                ..Default::default()
            }),
        }
    }

    #[test]
    fn realistic_session_scores_low_risk() {
        let analysis = analyze_bot_risk(&realistic_telemetry());
        assert!(analysis.flags.is_empty(), "flags: {:?}", analysis.flags);
        assert!(!analysis.is_bot);
        assert_eq!(analysis.confidence_score, 100);
    }

    #[test]
    fn bot_signature_scores_high_risk_and_high_difficulty() {
        let trajectory: Vec<TrajectoryPoint> = (0..20)
            .map(|i| TrajectoryPoint {
                timestamp: i * 10,
                value: (i as f64) * 5.0,
                delta: 5.0,
                velocity: 1.0,
                time_delta_ms: 10,
            })
            .collect();

        let telemetry = Telemetry {
            fingerprint: Some(Fingerprint {
                user_agent: Some("bot".into()),
                screen_resolution: Some("bad".into()),
                webdriver: true,
                timezone_name: None,
                canvas_fingerprint: None,
            }),
            trajectory: Some(trajectory),
            behavior: Some(BehaviorSummary {
                start_time: 0,
                end_time: 150,
                total_duration_ms: 150,
                event_count: 1,
                mouse_down_count: 0,
                mouse_move_count: 0,
                ..Default::default()
            }),
        };

        let analysis = analyze_bot_risk(&telemetry);
        assert!(analysis.is_bot);
        assert_eq!(analysis.confidence_score, 0);

        let decision = compute_pow_difficulty(&telemetry, &DifficultyTable::default());
        assert_eq!(decision.risk_level, RiskLevel::High);
        assert_eq!(decision.difficulty, 22);
    }

    #[test]
    fn score_never_exceeds_bounds() {
        let analysis = analyze_bot_risk(&Telemetry::default());
        assert!(analysis.confidence_score >= 0 && analysis.confidence_score <= 100);
    }
}
