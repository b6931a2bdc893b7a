use super::configuration::RabbitMqSettings;
use super::LapinChannel;
use crate::broker::ChannelProvider;
use anyhow::Context;
use lapin::tcp::{AMQPUriTcpExt, NativeTlsConnector};
use lapin::uri::{AMQPScheme, AMQPUri};
use lapin::{Connection, ConnectionProperties};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::warn;

/// Opens connections to a RabbitMq broker.
///
/// As a [`ChannelProvider`], every acquired channel gets a brand new connection: use a
/// [`ChannelPool`](crate::pool::ChannelPool) to share connections across channels.
#[derive(Clone)]
pub struct ConnectionFactory {
    uri: AMQPUri,
    connection_timeout: Duration,
    /// Plain text connections if `None`.
    tls: Option<Arc<Tls>>,
}

struct Tls {
    connector: NativeTlsConnector,
    /// Expected CN of the server certificate.
    domain_name: String,
}

impl ConnectionFactory {
    pub fn new_from_config(settings: &RabbitMqSettings) -> Result<Self, anyhow::Error> {
        let uri = settings.amqp_uri();
        let tls = match &settings.tls {
            None => None,
            Some(tls_settings) => {
                let mut builder = NativeTlsConnector::builder();
                if let Some(certificate) = tls_settings.ca_certificate_chain()? {
                    builder.add_root_certificate(certificate);
                }
                let connector = builder
                    .build()
                    .context("Failed to build the TLS connector for RabbitMq")?;
                Some(Arc::new(Tls {
                    connector,
                    domain_name: tls_settings
                        .domain
                        .clone()
                        .unwrap_or_else(|| uri.authority.host.clone()),
                }))
            }
        };

        Ok(Self {
            uri,
            connection_timeout: settings.connection_timeout(),
            tls,
        })
    }

    /// Encrypt connections with `connector`, expecting `domain_name` on the server certificate.
    #[must_use]
    pub fn with_tls_connector(mut self, connector: NativeTlsConnector, domain_name: String) -> Self {
        self.tls = Some(Arc::new(Tls {
            connector,
            domain_name,
        }));
        self
    }

    #[tracing::instrument(name = "rabbitmq_connect", skip(self), fields(host = %self.uri.authority.host))]
    pub async fn new_connection(&self) -> Result<Connection, anyhow::Error> {
        let properties =
            ConnectionProperties::default().with_executor(tokio_executor_trait::Tokio::current());
        let connect = async {
            match &self.tls {
                None => Connection::connect_uri(self.uri.clone(), properties).await,
                Some(tls) => self.connect_with_tls(properties, Arc::clone(tls)).await,
            }
        };
        let connection = timeout(self.connection_timeout, connect)
            .await
            .context("Timed out connecting to RabbitMq")??;
        connection.on_error(|e| {
            warn!("RabbitMQ broken connection: {:?}", e);
        });
        Ok(connection)
    }

    async fn connect_with_tls(
        &self,
        properties: ConnectionProperties,
        tls: Arc<Tls>,
    ) -> Result<Connection, lapin::Error> {
        Connection::connector(
            self.uri.clone(),
            Box::new(move |uri| {
                // Plain TCP first, then the TLS handshake against the expected domain.
                let mut amqp_uri = uri.clone();
                amqp_uri.scheme = AMQPScheme::AMQP;
                amqp_uri
                    .connect()
                    .and_then(|tcp| tcp.into_native_tls(&tls.connector, &tls.domain_name))
            }),
            properties,
        )
        .await
    }
}

#[async_trait::async_trait]
impl ChannelProvider for ConnectionFactory {
    type Channel = LapinChannel;

    async fn acquire(&self) -> Result<LapinChannel, anyhow::Error> {
        let channel = self
            .new_connection()
            .await?
            .create_channel()
            .await
            .context("Failed to open a channel")?;
        Ok(LapinChannel::new(channel))
    }
}
