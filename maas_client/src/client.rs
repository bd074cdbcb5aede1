//! The MAAS region API client.
//!
//! All calls are signed with OAuth1 PLAINTEXT, accept a cancellation token
//! and return promptly when it fires. Mutating calls use the upstream's
//! `op=` idiom: a POST with the operation name as a query parameter and a
//! multipart form body.

use std::time::Duration;

use reqwest::{
    header::{ACCEPT, AUTHORIZATION},
    multipart, RequestBuilder, Url,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    auth::ApiCredentials,
    error::{MaasError, MaasResult},
    types::{AllocateParams, DeployParams, Machine, Script, Subnet, Tag},
};

pub struct MaasClient {
    http: reqwest::Client,
    api_base: Url,
    credentials: ApiCredentials,
}

impl MaasClient {
    /// Build a client for a region endpoint such as `http://maas:5240/MAAS`.
    pub fn new(
        base_url: &str,
        credentials: ApiCredentials,
        timeout: Duration,
    ) -> MaasResult<Self> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{}/", base_url)
        };
        let api_base = Url::parse(&normalized)
            .and_then(|base| base.join("api/2.0/"))
            .map_err(|e| MaasError::InvalidUrl(e.to_string()))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            api_base,
            credentials,
        })
    }

    fn url(&self, path: &str) -> MaasResult<Url> {
        self.api_base
            .join(path.trim_start_matches('/'))
            .map_err(|e| MaasError::InvalidUrl(e.to_string()))
    }

    /// Sign, send and decode a request, racing it against cancellation.
    async fn execute(
        &self,
        request: RequestBuilder,
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        let request = request
            .header(AUTHORIZATION, self.credentials.authorization_header())
            .header(ACCEPT, "application/json");

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(MaasError::Cancelled),
            result = request.send() => result.map_err(map_transport_error)?,
        };

        let status = response.status();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(MaasError::Cancelled),
            result = response.text() => result.map_err(map_transport_error)?,
        };

        if !status.is_success() {
            debug!("MAAS request failed with {}: {}", status, body);
            return Err(MaasError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|e| MaasError::Decode(e.to_string()))
    }

    /// GET a resource path with optional query parameters.
    pub async fn get(
        &self,
        path: &str,
        query: &[(&str, String)],
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        let mut url = self.url(path)?;
        for (key, value) in query {
            url.query_pairs_mut().append_pair(key, value);
        }
        self.execute(self.http.get(url), cancel).await
    }

    /// POST with the `op=` query parameter and a multipart form body.
    pub async fn post_op(
        &self,
        path: &str,
        op: Option<&str>,
        params: Vec<(&'static str, String)>,
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        let mut url = self.url(path)?;
        if let Some(op) = op {
            url.query_pairs_mut().append_pair("op", op);
        }
        let mut form = multipart::Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        self.execute(self.http.post(url).multipart(form), cancel)
            .await
    }

    /// POST a multipart form carrying a file part alongside text fields.
    pub async fn post_op_with_file(
        &self,
        path: &str,
        op: Option<&str>,
        params: Vec<(&'static str, String)>,
        file_name: &str,
        contents: Vec<u8>,
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        let mut url = self.url(path)?;
        if let Some(op) = op {
            url.query_pairs_mut().append_pair("op", op);
        }
        let mut form = multipart::Form::new();
        for (key, value) in params {
            form = form.text(key, value);
        }
        let part = multipart::Part::bytes(contents).file_name(file_name.to_string());
        form = form.part("script", part);
        self.execute(self.http.post(url).multipart(form), cancel)
            .await
    }

    pub async fn delete(&self, path: &str, cancel: &CancellationToken) -> MaasResult<Value> {
        let url = self.url(path)?;
        self.execute(self.http.delete(url), cancel).await
    }

    // ------------------------------------------------------------------
    // Machines
    // ------------------------------------------------------------------

    pub async fn list_machines(&self, cancel: &CancellationToken) -> MaasResult<Vec<Machine>> {
        decode(self.get("machines/", &[], cancel).await?)
    }

    pub async fn get_machine(
        &self,
        system_id: &str,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        decode(
            self.get(&format!("machines/{}/", system_id), &[], cancel)
                .await?,
        )
    }

    pub async fn allocate_machine(
        &self,
        params: &AllocateParams,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        decode(
            self.post_op("machines/", Some("allocate"), params.to_form_params(), cancel)
                .await?,
        )
    }

    pub async fn deploy_machine(
        &self,
        system_id: &str,
        params: &DeployParams,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        decode(
            self.post_op(
                &format!("machines/{}/", system_id),
                Some("deploy"),
                params.to_form_params(),
                cancel,
            )
            .await?,
        )
    }

    pub async fn release_machine(
        &self,
        system_id: &str,
        comment: Option<&str>,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        let mut params = Vec::new();
        if let Some(comment) = comment {
            params.push(("comment", comment.to_string()));
        }
        decode(
            self.post_op(
                &format!("machines/{}/", system_id),
                Some("release"),
                params,
                cancel,
            )
            .await?,
        )
    }

    pub async fn power_on(
        &self,
        system_id: &str,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        decode(
            self.post_op(
                &format!("machines/{}/", system_id),
                Some("power_on"),
                Vec::new(),
                cancel,
            )
            .await?,
        )
    }

    pub async fn power_off(
        &self,
        system_id: &str,
        cancel: &CancellationToken,
    ) -> MaasResult<Machine> {
        decode(
            self.post_op(
                &format!("machines/{}/", system_id),
                Some("power_off"),
                Vec::new(),
                cancel,
            )
            .await?,
        )
    }

    // ------------------------------------------------------------------
    // Tags
    // ------------------------------------------------------------------

    pub async fn list_tags(&self, cancel: &CancellationToken) -> MaasResult<Vec<Tag>> {
        decode(self.get("tags/", &[], cancel).await?)
    }

    pub async fn create_tag(
        &self,
        name: &str,
        comment: Option<&str>,
        cancel: &CancellationToken,
    ) -> MaasResult<Tag> {
        let mut params = vec![("name", name.to_string())];
        if let Some(comment) = comment {
            params.push(("comment", comment.to_string()));
        }
        decode(self.post_op("tags/", None, params, cancel).await?)
    }

    pub async fn tag_machine(
        &self,
        tag: &str,
        system_id: &str,
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        self.post_op(
            &format!("tags/{}/", tag),
            Some("update_nodes"),
            vec![("add", system_id.to_string())],
            cancel,
        )
        .await
    }

    pub async fn untag_machine(
        &self,
        tag: &str,
        system_id: &str,
        cancel: &CancellationToken,
    ) -> MaasResult<Value> {
        self.post_op(
            &format!("tags/{}/", tag),
            Some("update_nodes"),
            vec![("remove", system_id.to_string())],
            cancel,
        )
        .await
    }

    // ------------------------------------------------------------------
    // Scripts
    // ------------------------------------------------------------------

    pub async fn upload_script(
        &self,
        name: &str,
        contents: Vec<u8>,
        cancel: &CancellationToken,
    ) -> MaasResult<Script> {
        decode(
            self.post_op_with_file(
                "scripts/",
                None,
                vec![("name", name.to_string())],
                name,
                contents,
                cancel,
            )
            .await?,
        )
    }

    // ------------------------------------------------------------------
    // Subnets
    // ------------------------------------------------------------------

    pub async fn list_subnets(&self, cancel: &CancellationToken) -> MaasResult<Vec<Subnet>> {
        decode(self.get("subnets/", &[], cancel).await?)
    }

    pub async fn get_subnet(&self, id: u64, cancel: &CancellationToken) -> MaasResult<Subnet> {
        decode(self.get(&format!("subnets/{}/", id), &[], cancel).await?)
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> MaasResult<T> {
    serde_json::from_value(value).map_err(|e| MaasError::Decode(e.to_string()))
}

fn map_transport_error(error: reqwest::Error) -> MaasError {
    if error.is_timeout() {
        MaasError::Timeout
    } else {
        MaasError::Http(error)
    }
}
