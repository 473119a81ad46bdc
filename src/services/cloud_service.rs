//! Cloud service - provider specific exposure settings
//!
//! SSL certificates and static IPs are set through annotations that only
//! the provider's controllers understand. The provider is detected once from
//! the nodes; unknown providers get [`CloudError::NotImplemented`] for every
//! operation.

use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::app::{App, User};
use crate::error::{ClusterError, CloudError, TeresaError};
use crate::infrastructure::cluster::CloudCluster;
use crate::infrastructure::registry::AppRegistry;

pub const AWS_SSL_CERT_ANNOTATION: &str = "service.beta.kubernetes.io/aws-load-balancer-ssl-cert";
pub const AWS_SSL_PORTS_ANNOTATION: &str =
    "service.beta.kubernetes.io/aws-load-balancer-ssl-ports";
pub const GCE_SSL_CERT_ANNOTATION: &str = "ingress.gcp.kubernetes.io/pre-shared-cert";
pub const GCE_STATIC_IP_ANNOTATION: &str = "kubernetes.io/ingress.global-static-ip-name";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudProvider {
    Aws,
    Gce,
    /// Anything else; nothing provider specific is supported
    Fallback,
}

impl CloudProvider {
    pub fn from_name(name: &str) -> Self {
        match name {
            "aws" => Self::Aws,
            "gce" => Self::Gce,
            _ => Self::Fallback,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gce => "gce",
            Self::Fallback => "fallback",
        }
    }

    /// Provider of the cluster's nodes; lookup failures fall back
    pub async fn detect(cluster: &dyn CloudCluster) -> Self {
        match cluster.cloud_provider_name().await {
            Ok(name) => {
                let provider = Self::from_name(&name);
                info!(detected = %name, provider = provider.name(), "cloud provider");
                provider
            }
            Err(e) => {
                warn!(error = %e, "failed to detect cloud provider, using fallback");
                Self::Fallback
            }
        }
    }
}

/// SSL settings of an app's service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SslInfo {
    pub cert: String,
    pub port: Option<i32>,
}

fn missing_service(app: &str) -> impl Fn(ClusterError) -> CloudError + '_ {
    move |e| {
        if e.is_not_found() {
            CloudError::ServiceNotFound {
                app: app.to_string(),
            }
        } else {
            CloudError::Cluster(e)
        }
    }
}

#[derive(Clone)]
pub struct CloudService {
    provider: CloudProvider,
    cluster: Arc<dyn CloudCluster>,
    registry: Arc<dyn AppRegistry>,
}

impl CloudService {
    pub fn new(
        provider: CloudProvider,
        cluster: Arc<dyn CloudCluster>,
        registry: Arc<dyn AppRegistry>,
    ) -> Self {
        Self {
            provider,
            cluster,
            registry,
        }
    }

    pub fn provider(&self) -> CloudProvider {
        self.provider
    }

    /// Terminate TLS for `app` with the provider certificate `cert`
    pub async fn set_ssl(
        &self,
        user: &User,
        app_name: &str,
        cert: &str,
        port: i32,
    ) -> Result<(), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        match self.provider {
            CloudProvider::Aws => self.aws_set_ssl(&app, cert, port).await?,
            CloudProvider::Gce => self.gce_set_ssl(&app, cert).await?,
            CloudProvider::Fallback => return Err(CloudError::NotImplemented.into()),
        }
        info!(
            app = %app.name,
            provider = self.provider.name(),
            user = %user.email,
            "ssl set"
        );
        Ok(())
    }

    async fn aws_set_ssl(&self, app: &App, cert: &str, port: i32) -> Result<(), CloudError> {
        if self.cluster.has_ingress(&app.name, &app.name).await? {
            return Err(CloudError::NotImplementedOnIngress);
        }
        let annotations = BTreeMap::from([
            (AWS_SSL_CERT_ANNOTATION.to_string(), cert.to_string()),
            (AWS_SSL_PORTS_ANNOTATION.to_string(), port.to_string()),
        ]);
        self.cluster
            .set_service_annotations(&app.name, &app.name, annotations)
            .await
            .map_err(missing_service(&app.name))
    }

    async fn gce_set_ssl(&self, app: &App, cert: &str) -> Result<(), CloudError> {
        if !self.cluster.has_ingress(&app.name, &app.name).await? {
            return Err(CloudError::NotImplementedOnLoadBalancer);
        }
        let annotations =
            BTreeMap::from([(GCE_SSL_CERT_ANNOTATION.to_string(), cert.to_string())]);
        self.cluster
            .set_ingress_annotations(&app.name, &app.name, annotations)
            .await?;
        Ok(())
    }

    pub async fn ssl_info(&self, user: &User, app_name: &str) -> Result<SslInfo, TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        let info = match self.provider {
            CloudProvider::Aws => {
                let annotations = self
                    .cluster
                    .service_annotations(&app.name, &app.name)
                    .await
                    .map_err(missing_service(&app.name))?;
                let port = match annotations.get(AWS_SSL_PORTS_ANNOTATION) {
                    Some(value) => Some(value.parse::<i32>().map_err(|_| {
                        CloudError::InvalidAnnotation {
                            key: AWS_SSL_PORTS_ANNOTATION.to_string(),
                            value: value.clone(),
                        }
                    })?),
                    None => None,
                };
                SslInfo {
                    cert: annotations
                        .get(AWS_SSL_CERT_ANNOTATION)
                        .cloned()
                        .unwrap_or_default(),
                    port,
                }
            }
            CloudProvider::Gce => {
                let annotations = match self.cluster.ingress_annotations(&app.name, &app.name).await
                {
                    Ok(annotations) => annotations,
                    Err(e) if e.is_not_found() => BTreeMap::new(),
                    Err(e) => return Err(CloudError::from(e).into()),
                };
                SslInfo {
                    cert: annotations
                        .get(GCE_SSL_CERT_ANNOTATION)
                        .cloned()
                        .unwrap_or_default(),
                    port: None,
                }
            }
            CloudProvider::Fallback => return Err(CloudError::NotImplemented.into()),
        };
        Ok(info)
    }

    /// Bind the app's ingress to a reserved global address
    pub async fn set_static_ip(
        &self,
        user: &User,
        app_name: &str,
        address_name: &str,
    ) -> Result<(), TeresaError> {
        let app = self.registry.check_perm_and_get(user, app_name).await?;
        if self.provider != CloudProvider::Gce {
            return Err(CloudError::NotImplemented.into());
        }
        if !self
            .cluster
            .has_ingress(&app.name, &app.name)
            .await
            .map_err(CloudError::from)?
        {
            return Err(CloudError::NotImplementedOnLoadBalancer.into());
        }
        let annotations = BTreeMap::from([(
            GCE_STATIC_IP_ANNOTATION.to_string(),
            address_name.to_string(),
        )]);
        self.cluster
            .set_ingress_annotations(&app.name, &app.name, annotations)
            .await
            .map_err(CloudError::from)?;
        info!(app = %app.name, address = address_name, user = %user.email, "static ip set");
        Ok(())
    }
}
