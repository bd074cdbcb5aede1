//! Resource registry: URI pattern matching and cached reads.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use mmg_maas_client::MaasClient;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    cache::{cache_control_value, CacheOptions, ResponseCache},
    error::{GatewayError, GatewayResult},
    protocol::ResourceDescriptor,
};

/// State handed to resource handlers.
#[derive(Clone)]
pub struct ResourceContext {
    pub cancel: CancellationToken,
    pub maas: Arc<MaasClient>,
}

#[async_trait]
pub trait ResourceHandler: Send + Sync {
    async fn read(
        &self,
        ctx: ResourceContext,
        params: &HashMap<String, String>,
    ) -> GatewayResult<Value>;
}

/// Caching policy declared per resource.
#[derive(Debug, Clone)]
pub struct CachePolicy {
    pub enabled: bool,
    /// Overrides the per-type TTL for entries written by this resource.
    pub ttl: Option<Duration>,
    pub private: bool,
    pub must_revalidate: bool,
    pub immutable: bool,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            private: false,
            must_revalidate: false,
            immutable: false,
        }
    }
}

impl CachePolicy {
    fn options(&self) -> CacheOptions {
        CacheOptions {
            ttl: self.ttl,
            private: self.private,
            must_revalidate: self.must_revalidate,
            immutable: self.immutable,
        }
    }
}

/// A registered resource: URI pattern with `{param}` segments, handler,
/// and the resource-type tag used for cache keys and TTL lookup.
pub struct ResourceDef {
    pub pattern: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub resource_type: &'static str,
    pub handler: Arc<dyn ResourceHandler>,
    pub cache: CachePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
    Bypass,
}

/// Headers the transport attaches to a cached read.
#[derive(Debug, Clone)]
pub struct CacheHeaders {
    pub cache_control: String,
    /// Seconds since insertion; emitted only on hits, only when > 0.
    pub age_seconds: Option<u64>,
}

pub struct ResourceResponse {
    pub value: Value,
    pub status: CacheStatus,
    pub headers: Option<CacheHeaders>,
}

pub struct ResourceRegistry {
    resources: Vec<ResourceDef>,
    cache: Arc<ResponseCache>,
}

impl ResourceRegistry {
    pub fn new(cache: Arc<ResponseCache>) -> Self {
        Self {
            resources: Vec::new(),
            cache,
        }
    }

    pub fn register(&mut self, def: ResourceDef) -> GatewayResult<()> {
        if self.resources.iter().any(|r| r.pattern == def.pattern) {
            return Err(GatewayError::Conflict(format!(
                "resource pattern '{}' is already registered",
                def.pattern
            )));
        }
        self.resources.push(def);
        Ok(())
    }

    pub fn list(&self) -> Vec<ResourceDescriptor> {
        let mut descriptors: Vec<ResourceDescriptor> = self
            .resources
            .iter()
            .map(|def| ResourceDescriptor {
                uri: def.pattern.to_string(),
                name: def.name.to_string(),
                description: Some(def.description.to_string()),
                mime_type: "application/json",
            })
            .collect();
        descriptors.sort_by(|a, b| a.uri.cmp(&b.uri));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Resolve a URI against the registered patterns.
    ///
    /// Exact matches beat parameterized ones; among parameterized matches
    /// the one with the most literal segments wins.
    fn resolve(&self, uri: &str) -> Option<(&ResourceDef, HashMap<String, String>)> {
        let path = uri.split('?').next().unwrap_or(uri);
        let mut best: Option<(&ResourceDef, HashMap<String, String>, usize, bool)> = None;

        for def in &self.resources {
            let Some((params, literals)) = match_pattern(def.pattern, path) else {
                continue;
            };
            let exact = params.is_empty();
            let better = match &best {
                None => true,
                Some((_, _, best_literals, best_exact)) => {
                    (exact && !best_exact) || (exact == *best_exact && literals > *best_literals)
                }
            };
            if better {
                best = Some((def, params, literals, exact));
            }
        }

        best.map(|(def, params, _, _)| (def, params))
    }

    /// Read a resource, consulting the cache per the resource's policy.
    pub async fn read(&self, ctx: ResourceContext, uri: &str) -> GatewayResult<ResourceResponse> {
        let (def, params) = self
            .resolve(uri)
            .ok_or_else(|| GatewayError::NotFound(format!("resource '{}'", uri)))?;

        if !def.cache.enabled || !self.cache.enabled() {
            let value = def.handler.read(ctx, &params).await?;
            return Ok(ResourceResponse {
                value,
                status: CacheStatus::Bypass,
                headers: None,
            });
        }

        let options = def.cache.options();
        let fingerprint = ResponseCache::fingerprint(def.resource_type, uri);

        if let Some(hit) = self.cache.get(&fingerprint) {
            let age_seconds = hit.age.as_secs();
            return Ok(ResourceResponse {
                value: hit.value,
                status: CacheStatus::Hit,
                headers: Some(CacheHeaders {
                    cache_control: cache_control_value(hit.ttl, &options),
                    age_seconds: (age_seconds > 0).then_some(age_seconds),
                }),
            });
        }

        debug!("Cache miss for '{}', reading upstream", fingerprint);
        let value = def.handler.read(ctx, &params).await?;
        self.cache
            .set(&fingerprint, value.clone(), def.resource_type, &options);
        let ttl = options
            .ttl
            .unwrap_or_else(|| self.cache.resource_ttl(def.resource_type));
        Ok(ResourceResponse {
            value,
            status: CacheStatus::Miss,
            headers: Some(CacheHeaders {
                cache_control: cache_control_value(ttl, &options),
                age_seconds: None,
            }),
        })
    }
}

/// Match a URI path against a pattern, returning captured parameters and
/// the number of literal segments.
fn match_pattern(pattern: &str, path: &str) -> Option<(HashMap<String, String>, usize)> {
    let pattern_segments: Vec<&str> = pattern.split('/').collect();
    let path_segments: Vec<&str> = path.split('/').collect();
    if pattern_segments.len() != path_segments.len() {
        return None;
    }

    let mut params = HashMap::new();
    let mut literals = 0;
    for (pattern_segment, path_segment) in pattern_segments.iter().zip(&path_segments) {
        if let Some(name) = pattern_segment
            .strip_prefix('{')
            .and_then(|s| s.strip_suffix('}'))
        {
            if path_segment.is_empty() {
                return None;
            }
            params.insert(name.to_string(), (*path_segment).to_string());
        } else if pattern_segment == path_segment {
            literals += 1;
        } else {
            return None;
        }
    }
    Some((params, literals))
}
