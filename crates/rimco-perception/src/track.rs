//! Track projection: position channels to bounded geographic tails.
//!
//! A [`TrackProjector`] owns one [`TrackState`] per configured track and
//! turns decoded channel values into [`TrackUpdate`]s:
//!
//! | Source | Input | Effect |
//! |---|---|---|
//! | `navsat` | fix | append `(lat, lon)` |
//! | `odometry` | pose | heading from orientation, then append the ENU position projected around `origin` |
//! | `path` | path | replace the tail with every pose in order, sent as one update |
//! | any | `orientation_topic` pose | heading only |
//!
//! Every update is appended to the track's own rotating JSON-lines file
//! (`track-<session>-<name>-<index>.jsonl`).  A failed write is logged and
//! never blocks the in-memory update.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use rimco_memory::{LogRecord, RotatingLogWriter, SessionStamp};
use rimco_types::{
    Channel, ChannelValue, LatLon, Pose, RimcoError, TRACK_TAIL_CAPACITY, TrackState, TrackUpdate,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::geo::{enu_to_latlon, yaw_from_quaternion};

// ────────────────────────────────────────────────────────────────────────────
// Configuration
// ────────────────────────────────────────────────────────────────────────────

/// Where a track's positions come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// `sensor_msgs/NavSatFix`: latitude/longitude directly.
    Navsat,
    /// `nav_msgs/Odometry`: local ENU position plus orientation.
    Odometry,
    /// `nav_msgs/Path`: a whole planned route replacing the tail.
    Path,
}

impl TrackSource {
    /// Wire type subscribed for the pose channel.
    pub fn message_type(self) -> &'static str {
        match self {
            TrackSource::Navsat => "sensor_msgs/msg/NavSatFix",
            TrackSource::Odometry => "nav_msgs/msg/Odometry",
            TrackSource::Path => "nav_msgs/msg/Path",
        }
    }
}

/// Wire type subscribed for an `orientation_topic`.
pub const ORIENTATION_MESSAGE_TYPE: &str = "nav_msgs/msg/Odometry";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackConfig {
    pub source: TrackSource,
    pub pose_topic: String,
    #[serde(default)]
    pub orientation_topic: Option<String>,
    /// `[lat, lon]` of the local frame's origin.  Required to place
    /// odometry and path positions on the map.
    #[serde(default)]
    pub origin: Option<[f64; 2]>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default, alias = "displayName")]
    pub display_name: Option<String>,
}

impl TrackConfig {
    fn origin(&self) -> Option<LatLon> {
        self.origin.map(LatLon::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Pose,
    Orientation,
}

// ────────────────────────────────────────────────────────────────────────────
// TrackProjector
// ────────────────────────────────────────────────────────────────────────────

pub struct TrackProjector {
    configs: BTreeMap<String, TrackConfig>,
    states: BTreeMap<String, TrackState>,
    writers: HashMap<String, RotatingLogWriter>,
    /// channel name → every (track, role) it feeds.
    routes: HashMap<String, Vec<(String, Input)>>,
}

impl TrackProjector {
    /// Build the projector for `configs`, logging to `log_dir`.
    ///
    /// Odometry tracks start with heading 0 so the marker renders before the
    /// first message arrives; other sources start without a heading.
    pub fn new(
        configs: BTreeMap<String, TrackConfig>,
        log_dir: impl Into<PathBuf>,
        session_id: &str,
        max_log_bytes: u64,
    ) -> Self {
        let log_dir = log_dir.into();
        let mut states = BTreeMap::new();
        let mut writers = HashMap::new();
        let mut routes: HashMap<String, Vec<(String, Input)>> = HashMap::new();

        for (name, config) in &configs {
            let initial_yaw = (config.source == TrackSource::Odometry).then_some(0.0);
            let display_name = config.display_name.clone().unwrap_or_else(|| name.clone());
            states.insert(
                name.clone(),
                TrackState::new(display_name, config.color.clone(), initial_yaw),
            );
            writers.insert(
                name.clone(),
                RotatingLogWriter::new(
                    &log_dir,
                    "track",
                    Some(name.clone()),
                    SessionStamp::Fixed(session_id.to_string()),
                    max_log_bytes,
                ),
            );
            routes
                .entry(config.pose_topic.clone())
                .or_default()
                .push((name.clone(), Input::Pose));
            if let Some(topic) = &config.orientation_topic {
                routes
                    .entry(topic.clone())
                    .or_default()
                    .push((name.clone(), Input::Orientation));
            }
        }

        Self {
            configs,
            states,
            writers,
            routes,
        }
    }

    /// Channels the projector needs subscribed, deduplicated.
    pub fn channels(&self) -> Vec<Channel> {
        let mut out: BTreeMap<String, Channel> = BTreeMap::new();
        for config in self.configs.values() {
            out.entry(config.pose_topic.clone()).or_insert_with(|| {
                Channel::new(&config.pose_topic, config.source.message_type())
            });
            if let Some(topic) = &config.orientation_topic {
                out.entry(topic.clone())
                    .or_insert_with(|| Channel::new(topic, ORIENTATION_MESSAGE_TYPE));
            }
        }
        out.into_values().collect()
    }

    /// Whether any track listens on `channel`.
    pub fn routes(&self, channel: &str) -> bool {
        self.routes.contains_key(channel)
    }

    pub fn state(&self, name: &str) -> Option<&TrackState> {
        self.states.get(name)
    }

    /// Owned copy of every track state, for viewer bootstrap.
    pub fn states(&self) -> BTreeMap<String, TrackState> {
        self.states.clone()
    }

    /// Route a decoded message from `channel` to every track fed by it.
    ///
    /// Returns `(track name, update)` pairs in application order.  Values of
    /// an unexpected shape are dropped with a debug log.
    pub async fn on_message(&mut self, channel: &str, value: &ChannelValue) -> Vec<(String, TrackUpdate)> {
        let Some(targets) = self.routes.get(channel).cloned() else {
            return Vec::new();
        };

        let mut updates = Vec::new();
        for (name, input) in targets {
            let Some(config) = self.configs.get(&name).cloned() else {
                continue;
            };
            let result = match (input, config.source, value) {
                (Input::Orientation, _, ChannelValue::Pose(pose)) => {
                    self.on_heading(&name, pose).await.map(|u| vec![u])
                }
                (Input::Pose, TrackSource::Navsat, ChannelValue::Fix(fix)) => {
                    if fix.latitude.is_finite() && fix.longitude.is_finite() {
                        self.push_point(&name, LatLon::new(fix.latitude, fix.longitude))
                            .await
                            .map(|u| vec![u])
                    } else {
                        debug!(track = %name, "fix without position dropped");
                        Ok(Vec::new())
                    }
                }
                (Input::Pose, TrackSource::Odometry, ChannelValue::Pose(pose)) => {
                    self.on_odometry(&name, config.origin(), pose).await
                }
                (Input::Pose, TrackSource::Path, ChannelValue::Path(path)) => {
                    self.on_path(&name, config.origin(), &path.poses).await
                }
                _ => {
                    debug!(track = %name, channel, "value shape does not match track source");
                    Ok(Vec::new())
                }
            };
            match result {
                Ok(batch) => updates.extend(batch.into_iter().map(|u| (name.clone(), u))),
                Err(e) => warn!(track = %name, error = %e, "track update dropped"),
            }
        }
        updates
    }

    /// Append `point` to the tail of `name`, evicting the oldest point past
    /// capacity.
    pub async fn push_point(&mut self, name: &str, point: LatLon) -> Result<TrackUpdate, RimcoError> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| RimcoError::UnknownTrack(name.to_string()))?;
        append(state, point);
        let update = TrackUpdate::Point {
            point,
            yaw: state.yaw,
            color: state.color.clone(),
        };
        self.record(name, &update).await;
        Ok(update)
    }

    /// Set the heading of `name` without touching its tail.
    pub async fn push_yaw(&mut self, name: &str, yaw: f64) -> Result<TrackUpdate, RimcoError> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| RimcoError::UnknownTrack(name.to_string()))?;
        state.yaw = Some(yaw);
        let update = TrackUpdate::Heading { yaw };
        self.record(name, &update).await;
        Ok(update)
    }

    /// Empty the tail of `name`.
    pub async fn clear(&mut self, name: &str) -> Result<TrackUpdate, RimcoError> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| RimcoError::UnknownTrack(name.to_string()))?;
        state.tail.clear();
        let update = TrackUpdate::Cleared { cleared: true };
        self.record(name, &update).await;
        Ok(update)
    }

    /// Flush every open track log.
    pub async fn flush_logs(&mut self) {
        for (name, writer) in &mut self.writers {
            if let Err(e) = writer.flush().await {
                warn!(track = %name, error = %e, "track log flush failed");
            }
        }
    }

    async fn on_heading(&mut self, name: &str, pose: &Pose) -> Result<TrackUpdate, RimcoError> {
        self.push_yaw(name, yaw_from_quaternion(&pose.orientation)).await
    }

    async fn on_odometry(
        &mut self,
        name: &str,
        origin: Option<LatLon>,
        pose: &Pose,
    ) -> Result<Vec<TrackUpdate>, RimcoError> {
        let yaw = yaw_from_quaternion(&pose.orientation);
        let Some(origin) = origin else {
            return Ok(vec![self.push_yaw(name, yaw).await?]);
        };
        self.set_yaw(name, yaw)?;
        let point = enu_to_latlon(pose.position.x, pose.position.y, origin);
        Ok(vec![self.push_point(name, point).await?])
    }

    async fn on_path(
        &mut self,
        name: &str,
        origin: Option<LatLon>,
        poses: &[Pose],
    ) -> Result<Vec<TrackUpdate>, RimcoError> {
        let Some(origin) = origin else {
            debug!(track = %name, "path track without origin; dropped");
            return Ok(Vec::new());
        };
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| RimcoError::UnknownTrack(name.to_string()))?;
        state.tail.clear();
        for pose in poses {
            state.yaw = Some(yaw_from_quaternion(&pose.orientation));
            append(state, enu_to_latlon(pose.position.x, pose.position.y, origin));
        }
        let update = TrackUpdate::Path {
            points: state.tail.iter().copied().collect(),
            yaw: state.yaw,
            color: state.color.clone(),
        };
        self.record(name, &update).await;
        Ok(vec![update])
    }

    fn set_yaw(&mut self, name: &str, yaw: f64) -> Result<(), RimcoError> {
        let state = self
            .states
            .get_mut(name)
            .ok_or_else(|| RimcoError::UnknownTrack(name.to_string()))?;
        state.yaw = Some(yaw);
        Ok(())
    }

    async fn record(&mut self, name: &str, update: &TrackUpdate) {
        let Some(writer) = self.writers.get_mut(name) else {
            return;
        };
        if let Err(e) = writer.append(&LogRecord::now(update)).await {
            warn!(track = %name, error = %e, "track log write failed");
        }
    }
}

fn append(state: &mut TrackState, point: LatLon) {
    state.tail.push_back(point);
    while state.tail.len() > TRACK_TAIL_CAPACITY {
        state.tail.pop_front();
    }
    state.last = Some(point);
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rimco_types::{GeoFix, PathValue, Point, Quaternion};
    use std::f64::consts::FRAC_PI_2;
    use std::path::Path;

    fn config(source: TrackSource, topic: &str, origin: Option<[f64; 2]>) -> TrackConfig {
        TrackConfig {
            source,
            pose_topic: topic.into(),
            orientation_topic: None,
            origin,
            color: Some("#ff8800".into()),
            display_name: None,
        }
    }

    fn projector(dir: &Path, tracks: Vec<(&str, TrackConfig)>) -> TrackProjector {
        let configs = tracks.into_iter().map(|(n, c)| (n.to_string(), c)).collect();
        TrackProjector::new(configs, dir, "2025-06-01_13", 10 * 1_048_576)
    }

    fn pose_at(x: f64, y: f64) -> Pose {
        Pose {
            position: Point { x, y, z: 0.0 },
            orientation: Quaternion::identity(),
        }
    }

    #[tokio::test]
    async fn initial_heading_depends_on_source() {
        let dir = tempfile::tempdir().unwrap();
        let p = projector(
            dir.path(),
            vec![
                ("gnss", config(TrackSource::Navsat, "/fix", None)),
                ("odom", config(TrackSource::Odometry, "/odom", Some([50.0, 13.0]))),
            ],
        );
        assert_eq!(p.state("gnss").unwrap().yaw, None);
        assert_eq!(p.state("odom").unwrap().yaw, Some(0.0));
        assert_eq!(p.state("gnss").unwrap().display_name, "gnss");
    }

    #[tokio::test]
    async fn tail_is_capped_and_evicts_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);

        for i in 0..=TRACK_TAIL_CAPACITY {
            p.push_point("gnss", LatLon::new(i as f64 * 1e-5, 0.0)).await.unwrap();
        }

        let state = p.state("gnss").unwrap();
        assert_eq!(state.tail.len(), TRACK_TAIL_CAPACITY);
        assert_eq!(state.tail.front().unwrap().lat, 1e-5);
        assert_eq!(state.last, state.tail.back().copied());
    }

    #[tokio::test]
    async fn unknown_track_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![]);
        assert!(matches!(
            p.push_point("ghost", LatLon::new(0.0, 0.0)).await,
            Err(RimcoError::UnknownTrack(_))
        ));
    }

    #[tokio::test]
    async fn yaw_only_update_leaves_tail_alone() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);
        p.push_point("gnss", LatLon::new(1.0, 2.0)).await.unwrap();

        let update = p.push_yaw("gnss", 0.25).await.unwrap();
        assert_eq!(update, TrackUpdate::Heading { yaw: 0.25 });
        let state = p.state("gnss").unwrap();
        assert_eq!(state.tail.len(), 1);
        assert_eq!(state.yaw, Some(0.25));
    }

    #[tokio::test]
    async fn navsat_fix_appends_lat_lon() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);
        let fix = ChannelValue::Fix(GeoFix { latitude: 48.1, longitude: 11.5, altitude: 500.0 });

        let updates = p.on_message("/fix", &fix).await;
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].0, "gnss");
        assert!(matches!(
            updates[0].1,
            TrackUpdate::Point { point, yaw: None, .. } if point == LatLon::new(48.1, 11.5)
        ));
    }

    #[tokio::test]
    async fn odometry_projects_around_origin_with_heading() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(
            dir.path(),
            vec![("odom", config(TrackSource::Odometry, "/odom", Some([50.0, 13.0])))],
        );

        let updates = p.on_message("/odom", &ChannelValue::Pose(pose_at(100.0, 0.0))).await;
        assert_eq!(updates.len(), 1);
        let TrackUpdate::Point { point, yaw, .. } = updates[0].1.clone() else {
            panic!("expected a point update, got {:?}", updates[0].1);
        };
        assert!((point.lat - 50.0).abs() < 1e-9);
        assert!(point.lon > 13.0);
        assert!((yaw.unwrap() - FRAC_PI_2).abs() < 1e-9);

        let state = p.state("odom").unwrap();
        assert_eq!(state.last, Some(point));
        assert!((state.yaw.unwrap() - FRAC_PI_2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn odometry_without_origin_updates_heading_only() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("odom", config(TrackSource::Odometry, "/odom", None))]);

        let updates = p.on_message("/odom", &ChannelValue::Pose(pose_at(5.0, 5.0))).await;
        assert!(matches!(updates[0].1, TrackUpdate::Heading { .. }));
        assert!(p.state("odom").unwrap().tail.is_empty());
    }

    #[tokio::test]
    async fn path_replaces_previous_tail() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(
            dir.path(),
            vec![("plan", config(TrackSource::Path, "/plan", Some([0.0, 0.0])))],
        );
        let first = PathValue { poses: vec![pose_at(0.0, 0.0), pose_at(1.0, 0.0), pose_at(2.0, 0.0)] };
        let second = PathValue { poses: vec![pose_at(0.0, 5.0)] };

        p.on_message("/plan", &ChannelValue::Path(first)).await;
        assert_eq!(p.state("plan").unwrap().tail.len(), 3);

        let updates = p.on_message("/plan", &ChannelValue::Path(second)).await;
        assert_eq!(updates.len(), 1);
        let TrackUpdate::Path { points, .. } = &updates[0].1 else {
            panic!("expected a path update, got {:?}", updates[0].1);
        };
        let tail = &p.state("plan").unwrap().tail;
        assert_eq!(tail.len(), 1);
        assert!(tail[0].lat > 0.0);
        assert_eq!(points.as_slice(), tail.iter().copied().collect::<Vec<_>>().as_slice());
    }

    #[tokio::test]
    async fn long_path_is_a_single_update() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(
            dir.path(),
            vec![("plan", config(TrackSource::Path, "/plan", Some([0.0, 0.0])))],
        );
        let poses = (0..400).map(|i| pose_at(i as f64, 0.0)).collect();

        let updates = p.on_message("/plan", &ChannelValue::Path(PathValue { poses })).await;
        assert_eq!(updates.len(), 1);
        let TrackUpdate::Path { points, yaw, .. } = &updates[0].1 else {
            panic!("expected a path update, got {:?}", updates[0].1);
        };
        assert_eq!(points.len(), 400);
        assert!(yaw.is_some());
        assert_eq!(p.state("plan").unwrap().last, points.last().copied());
    }

    #[tokio::test]
    async fn orientation_topic_feeds_heading() {
        let dir = tempfile::tempdir().unwrap();
        let mut gnss = config(TrackSource::Navsat, "/fix", None);
        gnss.orientation_topic = Some("/odom".into());
        let mut p = projector(dir.path(), vec![("gnss", gnss)]);

        let channels = p.channels();
        assert_eq!(channels.len(), 2);
        assert!(channels.iter().any(|c| c.name == "/odom" && c.message_type == ORIENTATION_MESSAGE_TYPE));

        let updates = p.on_message("/odom", &ChannelValue::Pose(pose_at(9.0, 9.0))).await;
        assert!(matches!(updates[0].1, TrackUpdate::Heading { .. }));
        assert!(p.state("gnss").unwrap().tail.is_empty());
    }

    #[tokio::test]
    async fn unrouted_channel_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);
        assert!(!p.routes("/other"));
        assert!(p.on_message("/other", &ChannelValue::Number(1.0)).await.is_empty());
    }

    #[tokio::test]
    async fn every_update_is_logged_per_track() {
        let dir = tempfile::tempdir().unwrap();
        let mut p = projector(dir.path(), vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);
        p.push_point("gnss", LatLon::new(1.0, 2.0)).await.unwrap();
        p.push_yaw("gnss", 0.5).await.unwrap();
        p.flush_logs().await;

        let content =
            std::fs::read_to_string(dir.path().join("track-2025-06-01_13-gnss-0.jsonl")).unwrap();
        let lines: Vec<serde_json::Value> =
            content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["point"], serde_json::json!([1.0, 2.0]));
        assert_eq!(lines[1]["yaw"], 0.5);
        assert!(lines[1]["stamp"].is_i64());
    }

    #[tokio::test]
    async fn log_failure_does_not_block_update() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the log directory should be.
        let blocker = dir.path().join("blocked");
        std::fs::write(&blocker, "").unwrap();
        let mut p = projector(&blocker, vec![("gnss", config(TrackSource::Navsat, "/fix", None))]);

        p.push_point("gnss", LatLon::new(1.0, 2.0)).await.unwrap();
        assert_eq!(p.state("gnss").unwrap().tail.len(), 1);
    }
}
