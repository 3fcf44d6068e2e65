use tonic::transport::Channel;

/// 远程服务契约：由生成的 gRPC 客户端实现，替代按接口名的无类型转换
pub trait RemoteService: Send + Sync + 'static {
    /// 完整的服务名，例如 `demo.Greeter`
    const INTERFACE: &'static str;

    fn from_channel(channel: Channel) -> Self;
}

/// 为 tonic 生成的客户端实现 [`RemoteService`]
///
/// ```rust,ignore
/// remote_service!(GreeterClient<Channel>, "demo.Greeter");
/// ```
#[macro_export]
macro_rules! remote_service {
    ($client:ty, $interface:expr) => {
        impl $crate::RemoteService for $client {
            const INTERFACE: &'static str = $interface;

            fn from_channel(channel: $crate::Channel) -> Self {
                <$client>::new(channel)
            }
        }
    };
}
