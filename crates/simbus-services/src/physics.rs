// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Ground-intersection service.
//!
//! Scene backends are loaded on demand through a [`SceneLoader`] and kept in
//! an LRU cache, so a rollout touching one scene pays the load once.

use crate::config::SceneConfig;
use crate::endpoints::{ChannelQos, PhysicsServerEndpoints};
use crate::error::{Result, ServiceError};
use crate::types::{
    Aabb, AvailableScenesResponse, GroundIntersectionStatus, PhysicsGroundIntersectionRequest,
    PhysicsGroundIntersectionReturn, Pose, ReturnPose, ShutdownRequest, VersionResponse,
};
use lru::LruCache;
use parking_lot::Mutex;
use simbus::{BoxError, Participant, StopSignal};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub const SERVICE_NAME: &str = "physics";

/// Ground geometry of one loaded scene.
pub trait GroundModel: Send + Sync {
    /// Constrain `pose` of an object with extents `aabb` to the ground.
    fn update_pose(&self, pose: &Pose, aabb: &Aabb, timestamp_us: u64) -> ReturnPose;
}

/// Source of scene backends.
pub trait SceneLoader: Send + Sync + 'static {
    /// Scenes this loader can provide.
    fn scene_ids(&self) -> Vec<String>;

    fn load(&self, scene_id: &str) -> Result<Arc<dyn GroundModel>>;
}

/// Horizontal ground plane at a fixed height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlatGround {
    pub height: f64,
}

impl GroundModel for FlatGround {
    fn update_pose(&self, pose: &Pose, _aabb: &Aabb, _timestamp_us: u64) -> ReturnPose {
        // Level on the plane: yaw survives, roll and pitch do not.
        ReturnPose {
            pose: Pose::planar(pose.vec.x, pose.vec.y, self.height, pose.yaw()),
            status: GroundIntersectionStatus::SuccessfulUpdate,
        }
    }
}

/// Flat-ground scenes declared in configuration.
#[derive(Debug, Clone, Default)]
pub struct FlatGroundScenes {
    scenes: BTreeMap<String, f64>,
}

impl FlatGroundScenes {
    pub fn new(scenes: &[SceneConfig]) -> Self {
        Self {
            scenes: scenes
                .iter()
                .map(|s| (s.id.clone(), s.ground_height))
                .collect(),
        }
    }
}

impl SceneLoader for FlatGroundScenes {
    fn scene_ids(&self) -> Vec<String> {
        self.scenes.keys().cloned().collect()
    }

    fn load(&self, scene_id: &str) -> Result<Arc<dyn GroundModel>> {
        let height = self
            .scenes
            .get(scene_id)
            .ok_or_else(|| ServiceError::UnknownScene(scene_id.to_string()))?;
        Ok(Arc::new(FlatGround { height: *height }))
    }
}

/// Physics service.
pub struct PhysicsService {
    endpoints: PhysicsServerEndpoints,
    loader: Arc<dyn SceneLoader>,
    cache: Mutex<LruCache<String, Arc<dyn GroundModel>>>,
    loads: AtomicU64,
    stop: StopSignal,
}

impl PhysicsService {
    pub fn new(
        participant: &Arc<Participant>,
        qos: &ChannelQos,
        loader: Arc<dyn SceneLoader>,
        cache_size: usize,
    ) -> Result<Self> {
        tracing::info!("Available scenes: {:?}", loader.scene_ids());
        let capacity = NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::MIN);
        Ok(Self {
            endpoints: PhysicsServerEndpoints::new(participant, qos)?,
            loader,
            cache: Mutex::new(LruCache::new(capacity)),
            loads: AtomicU64::new(0),
            stop: StopSignal::new(),
        })
    }

    /// Cached backend for `scene_id`, loading it on a miss.
    fn backend(&self, scene_id: &str) -> Result<Arc<dyn GroundModel>> {
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(scene_id) {
            return Ok(hit.clone());
        }
        tracing::info!("Cache miss, loading scene {}", scene_id);
        let backend = self.loader.load(scene_id)?;
        self.loads.fetch_add(1, Ordering::Relaxed);
        cache.put(scene_id.to_string(), backend.clone());
        Ok(backend)
    }

    pub fn ground_intersection(
        &self,
        request: &PhysicsGroundIntersectionRequest,
    ) -> Result<PhysicsGroundIntersectionReturn> {
        tracing::debug!(
            "ground_intersection request: scene_id={}, ego_data={}, other_objects={}",
            request.scene_id,
            if request.ego_data.is_some() { "present" } else { "None" },
            request.other_objects.len()
        );
        let backend = self.backend(&request.scene_id)?;

        let other_poses = request
            .other_objects
            .iter()
            .map(|other| {
                backend.update_pose(&other.pose_pair.future_pose, &other.aabb, request.future_us)
            })
            .collect();
        let ego_pose = request.ego_data.as_ref().map(|ego| {
            backend.update_pose(&ego.pose_pair.future_pose, &ego.aabb, request.future_us)
        });

        Ok(PhysicsGroundIntersectionReturn {
            ego_pose,
            other_poses,
        })
    }

    pub fn available_scenes(&self) -> AvailableScenesResponse {
        let mut scene_ids = self.loader.scene_ids();
        scene_ids.sort();
        AvailableScenesResponse { scene_ids }
    }

    pub fn version(&self) -> VersionResponse {
        VersionResponse::for_service(SERVICE_NAME)
    }

    /// Scene loads performed so far (cache misses).
    pub fn scene_loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn shut_down(&self, request: &ShutdownRequest) {
        tracing::info!("shut_down requested (t={}us)", request.timestamp_us);
        self.stop.stop();
    }

    /// Serve every channel until a shutdown message arrives or the stop
    /// signal is set.
    pub async fn run(&self) {
        tracing::info!("{} service running", SERVICE_NAME);
        let ep = &self.endpoints;
        let stop = &self.stop;
        tokio::join!(
            ep.ground_intersection.serve(
                |req| async move { self.ground_intersection(&req).map_err(BoxError::from) },
                stop,
            ),
            ep.available_scenes.serve(
                |_req| async move { Ok::<_, BoxError>(self.available_scenes()) },
                stop,
            ),
            ep.version.serve(
                |_req| async move { Ok::<_, BoxError>(self.version()) },
                stop,
            ),
            ep.shutdown.serve(
                |req| async move {
                    self.shut_down(&req);
                    Ok::<_, BoxError>(())
                },
                stop,
            ),
        );
        tracing::info!("{} service stopped", SERVICE_NAME);
    }
}
