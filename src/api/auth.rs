// Role checks for privileged endpoints. A handler that takes an
// `Authorized<C>` only runs when the node's role grants capability `C`.

use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::{web, FromRequest, HttpRequest};
use futures::future::{ready, Ready};

use super::error::ApiError;
use crate::node::{Capability, Node};

pub trait CapabilityMarker {
    const CAPABILITY: Capability;
}

pub struct MineCap;

impl CapabilityMarker for MineCap {
    const CAPABILITY: Capability = Capability::Mine;
}

pub struct AutoTransferCap;

impl CapabilityMarker for AutoTransferCap {
    const CAPABILITY: Capability = Capability::AutoTransfer;
}

pub struct AssignRewardCap;

impl CapabilityMarker for AssignRewardCap {
    const CAPABILITY: Capability = Capability::AssignReward;
}

/// The shared node, available only if its role allows `C`
pub struct Authorized<C> {
    node: web::Data<Node>,
    _capability: PhantomData<C>,
}

impl<C> Authorized<C> {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl<C> Deref for Authorized<C> {
    type Target = Node;

    fn deref(&self) -> &Node {
        self.node.get_ref()
    }
}

impl<C: CapabilityMarker> FromRequest for Authorized<C> {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(authorize(req))
    }
}

fn authorize<C: CapabilityMarker>(req: &HttpRequest) -> Result<Authorized<C>, ApiError> {
    let node = req
        .app_data::<web::Data<Node>>()
        .cloned()
        .ok_or_else(|| ApiError::Internal("node state is not configured".to_string()))?;

    node.role().authorize(C::CAPABILITY)?;

    Ok(Authorized {
        node,
        _capability: PhantomData,
    })
}
