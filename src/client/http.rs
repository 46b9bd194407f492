//! HTTP API client for the game server
//!
//! Blocking requests, issued from the feed worker thread only.

use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use super::config::ServerSettings;
use crate::core::io_traits::FeedError;
use crate::core::protocol::{
    MapStatsRequest, MapStatsResponse, PvpResponse, SigninRequest, SigninResponse,
    TerrainResponse, TickResponse,
};
use crate::core::room::RoomName;
use crate::core::terrain::Terrain;
use crate::core::types::{MapStats, PvpRoom};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Ownership stat queried for the scoreboard and policy
const OWNER_STAT: &str = "owner0";

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: Client,
    base: String,
    token: Option<String>,
    username: Option<String>,
    shard: Option<String>,
}

impl ApiClient {
    pub fn new(settings: &ServerSettings) -> Result<Self, FeedError> {
        let http = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| FeedError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base: settings.url.trim_end_matches('/').to_string(),
            token: (!settings.token.is_empty()).then(|| settings.token.clone()),
            username: (!settings.username.is_empty()).then(|| settings.username.clone()),
            shard: settings.shard().map(str::to_string),
        })
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn shard(&self) -> Option<&str> {
        self.shard.as_deref()
    }

    /// Websocket endpoint derived from the base URL
    pub fn socket_url(&self) -> String {
        let ws_base = if let Some(rest) = self.base.strip_prefix("https://") {
            format!("wss://{}", rest)
        } else if let Some(rest) = self.base.strip_prefix("http://") {
            format!("ws://{}", rest)
        } else {
            self.base.clone()
        };
        format!("{}/socket/websocket", ws_base)
    }

    /// Make sure a token is available, signing in when only credentials are set
    pub fn authenticate(&mut self, password: &str) -> Result<&str, FeedError> {
        if self.token.is_none() {
            let email = self
                .username
                .clone()
                .ok_or_else(|| FeedError::Auth("no token or username configured".to_string()))?;
            let body = SigninRequest {
                email: &email,
                password,
            };
            let response: SigninResponse = self
                .send(self.http.post(self.url("/api/auth/signin")).json(&body))
                .map_err(|e| FeedError::Auth(e.to_string()))?;
            info!(user = %email, "[HTTP] Signed in");
            self.token = Some(response.token);
        }
        self.token
            .as_deref()
            .ok_or_else(|| FeedError::Auth("no token".to_string()))
    }

    pub fn room_terrain(&self, room: &RoomName) -> Result<Terrain, FeedError> {
        let mut query = vec![("room", room.to_string()), ("encoded", "1".to_string())];
        if let Some(shard) = &self.shard {
            query.push(("shard", shard.clone()));
        }
        let response: TerrainResponse =
            self.send(self.http.get(self.url("/api/game/room-terrain")).query(&query))?;
        let encoded = response
            .terrain
            .into_iter()
            .next()
            .map(|t| t.terrain)
            .ok_or_else(|| FeedError::Protocol(format!("no terrain for {}", room)))?;
        Ok(Terrain::decode(room.clone(), &encoded)?)
    }

    /// Server tick duration in milliseconds
    pub fn tick_duration(&self) -> Result<u32, FeedError> {
        let mut request = self.http.get(self.url("/api/game/tick"));
        if let Some(shard) = &self.shard {
            request = request.query(&[("shard", shard)]);
        }
        let response: TickResponse = self.send(request)?;
        Ok(response.tick)
    }

    pub fn map_stats(&self, rooms: &[RoomName]) -> Result<MapStats, FeedError> {
        let body = MapStatsRequest {
            rooms: rooms.iter().map(RoomName::as_str).collect(),
            stat_name: OWNER_STAT,
            shard: self.shard.as_deref(),
        };
        let response: MapStatsResponse =
            self.send(self.http.post(self.url("/api/game/map-stats")).json(&body))?;
        Ok(response.into_map_stats())
    }

    /// Rooms with PvP within the last `interval` ticks, and the game time
    pub fn pvp(&self, interval: u64) -> Result<(u64, Vec<PvpRoom>), FeedError> {
        let response: PvpResponse = self.send(
            self.http
                .get(self.url("/api/experimental/pvp"))
                .query(&[("interval", interval)]),
        )?;
        Ok(response.into_rooms(self.shard.as_deref()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn send<T: DeserializeOwned>(&self, mut request: RequestBuilder) -> Result<T, FeedError> {
        if let Some(token) = &self.token {
            request = request.header("X-Token", token);
        }
        if let Some(username) = &self.username {
            request = request.header("X-Username", username);
        }
        let response: Response = request
            .send()
            .map_err(|e| FeedError::Http(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FeedError::Http(format!("{} {}", status, response.url().path())));
        }
        debug!(path = response.url().path(), "[HTTP] OK");
        response
            .json::<T>()
            .map_err(|e| FeedError::Protocol(e.to_string()))
    }
}
