//! Resource wrappers
//!
//! A resource is the unit a circuit breaker protects: a whole service, one
//! method of a service, or a single service instance. Resources are
//! value-equal by their identifying fields and serve as map keys throughout
//! the crate.

use std::fmt;

/// ServiceKey identifies a service inside a namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceKey {
    pub namespace: String,
    pub service: String,
}

impl ServiceKey {
    pub fn new(namespace: impl Into<String>, service: impl Into<String>) -> Self {
        ServiceKey {
            namespace: namespace.into(),
            service: service.into(),
        }
    }
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.service)
    }
}

/// Node is the network address of one instance. Its display form
/// (`host:port`) is the identity key inside the instance registry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Node {
    pub host: String,
    pub port: u32,
}

impl Node {
    pub fn new(host: impl Into<String>, port: u32) -> Self {
        Node {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// ResourceLevel classifies a resource in the service/method/instance
/// hierarchy. Rule selection and worker scheduling branch on it.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ResourceLevel {
    Service,
    Method,
    Instance,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceResource {
    pub service: ServiceKey,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodResource {
    pub service: ServiceKey,
    pub method: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceResource {
    pub service: ServiceKey,
    pub node: Node,
    /// protocol string advertised by the instance, e.g. `"grpc/http"`;
    /// parsed lazily when the instance enters a health checker
    pub protocol: String,
}

/// Resource is the unit the circuit breaker protects.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    Service(ServiceResource),
    Method(MethodResource),
    Instance(InstanceResource),
}

impl Resource {
    pub fn new_service(service: ServiceKey) -> Self {
        Resource::Service(ServiceResource { service })
    }

    pub fn new_method(service: ServiceKey, method: impl Into<String>) -> Self {
        Resource::Method(MethodResource {
            service,
            method: method.into(),
        })
    }

    pub fn new_instance(service: ServiceKey, node: Node, protocol: impl Into<String>) -> Self {
        Resource::Instance(InstanceResource {
            service,
            node,
            protocol: protocol.into(),
        })
    }

    pub fn service_key(&self) -> &ServiceKey {
        match self {
            Resource::Service(r) => &r.service,
            Resource::Method(r) => &r.service,
            Resource::Instance(r) => &r.service,
        }
    }

    pub fn level(&self) -> ResourceLevel {
        match self {
            Resource::Service(_) => ResourceLevel::Service,
            Resource::Method(_) => ResourceLevel::Method,
            Resource::Instance(_) => ResourceLevel::Instance,
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Resource::Method(r) => Some(&r.method),
            _ => None,
        }
    }

    /// The service-level resource an instance is probed under.
    pub fn parent(&self) -> Resource {
        Resource::new_service(self.service_key().clone())
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resource::Service(r) => write!(f, "{}", r.service),
            Resource::Method(r) => write!(f, "{}#{}", r.service, r.method),
            Resource::Instance(r) => write!(f, "{}@{}", r.service, r.node),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn resources_are_value_equal() {
        let a = Resource::new_method(ServiceKey::new("prod", "payments"), "pay");
        let b = Resource::new_method(ServiceKey::new("prod", "payments"), "pay");
        assert_eq!(a, b);

        let mut map = std::collections::HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn parent_of_instance_is_service() {
        let ins = Resource::new_instance(
            ServiceKey::new("prod", "payments"),
            Node::new("10.0.0.1", 80),
            "tcp",
        );
        assert_eq!(
            ins.parent(),
            Resource::new_service(ServiceKey::new("prod", "payments"))
        );
        assert_eq!(ins.level(), ResourceLevel::Instance);
    }

    #[test]
    fn display_forms() {
        let svc = Resource::new_service(ServiceKey::new("prod", "payments"));
        assert_eq!(svc.to_string(), "prod/payments");
        let node = Node::new("10.0.0.1", 8080);
        assert_eq!(node.to_string(), "10.0.0.1:8080");
    }
}
