pub mod demo {
    tonic::include_proto!("demo");
}
pub mod config;
pub mod error;
pub mod facade;
pub mod framework;
pub(crate) mod once_map;
pub mod registry;
pub mod server;

pub use config::{FacadeConfig, FacadeSettings, ReferenceKeyMode};
pub use error::{FacadeError, FrameworkError};
pub use facade::{FacadeCell, RegistryFacade, RemoteService};
pub use framework::{Framework, ReferenceConfig, ServiceConfig, TonicFramework};
pub use tonic::transport::Channel;

crate::remote_service!(demo::greeter_client::GreeterClient<Channel>, "demo.Greeter");
crate::remote_service!(demo::echo_client::EchoClient<Channel>, "demo.Echo");
