//! Control-socket client over Unix domain sockets.

use std::{
   path::{Path, PathBuf},
   time::Duration,
};

use async_trait::async_trait;

use super::{Connector, ControlClient, SHORT_TIMEOUT};
use crate::{
   Error, Result,
   config::Config,
   domain::Domain,
   error::IpcError,
   ipc::{self, CmdRequest, CmdResponse, PROTOCOL_VERSIONS, with_timeout},
   usock,
};

/// Dials launcher sockets with bounded connect and RPC timeouts.
#[derive(Debug, Clone, Copy)]
pub struct UnixConnector {
   connect_timeout: Duration,
   rpc_timeout:     Duration,
}

impl Default for UnixConnector {
   fn default() -> Self {
      Self::new(SHORT_TIMEOUT, SHORT_TIMEOUT)
   }
}

impl UnixConnector {
   pub const fn new(connect_timeout: Duration, rpc_timeout: Duration) -> Self {
      Self { connect_timeout, rpc_timeout }
   }

   pub fn from_config(cfg: &Config) -> Self {
      Self::new(cfg.probe_timeout(), cfg.rpc_timeout())
   }

   /// Dials and handshakes, returning the concrete client.
   pub async fn dial(&self, socket: &Path) -> Result<UnixControlClient> {
      let stream =
         with_timeout("connect", self.connect_timeout, usock::Stream::connect(socket)).await?;
      let mut client = UnixControlClient {
         stream,
         buffer: ipc::SocketBuffer::new(),
         rpc_timeout: self.rpc_timeout,
         socket: socket.to_path_buf(),
      };
      client.handshake().await?;
      Ok(client)
   }
}

#[async_trait]
impl Connector for UnixConnector {
   async fn connect(&self, socket: &Path) -> Result<Box<dyn ControlClient>> {
      Ok(Box::new(self.dial(socket).await?))
   }

   async fn probe(&self, socket: &Path, timeout: Duration) -> Result<()> {
      let stream = with_timeout("probe", timeout, usock::Stream::connect(socket)).await?;
      drop(stream);
      Ok(())
   }
}

/// Session with one launcher's control socket.
pub struct UnixControlClient {
   stream:      usock::Stream,
   buffer:      ipc::SocketBuffer,
   rpc_timeout: Duration,
   socket:      PathBuf,
}

impl UnixControlClient {
   pub fn socket(&self) -> &Path {
      &self.socket
   }

   async fn call(&mut self, op: &'static str, request: &CmdRequest) -> Result<CmdResponse> {
      let limit = self.rpc_timeout;
      let exchange = async {
         self.buffer.send(&mut self.stream, request).await?;
         self.buffer.recv::<_, CmdResponse>(&mut self.stream).await
      };
      match with_timeout(op, limit, exchange).await? {
         CmdResponse::Error { code, message } => {
            Err(Error::Server { op, reason: format!("{code}: {message}") })
         },
         response => Ok(response),
      }
   }

   async fn handshake(&mut self) -> Result<()> {
      let request = CmdRequest::Hello { protocol_versions: PROTOCOL_VERSIONS.to_vec() };
      match self.call("handshake", &request).await? {
         CmdResponse::Hello { protocol_version } if PROTOCOL_VERSIONS.contains(&protocol_version) => {
            Ok(())
         },
         CmdResponse::Hello { protocol_version } => {
            Err(IpcError::IncompatibleVersion(vec![protocol_version]).into())
         },
         _ => Err(Error::UnexpectedResponse("handshake")),
      }
   }
}

#[async_trait]
impl ControlClient for UnixControlClient {
   async fn get_domain(&mut self) -> Result<Option<Domain>> {
      match self.call("get_domain", &CmdRequest::GetDomain).await? {
         CmdResponse::Domain { domain } => Ok(domain),
         _ => Err(Error::UnexpectedResponse("get_domain")),
      }
   }

   async fn ping(&mut self) -> Result<()> {
      match self.call("ping", &CmdRequest::Ping).await? {
         CmdResponse::Pong => Ok(()),
         _ => Err(Error::UnexpectedResponse("ping")),
      }
   }
}
