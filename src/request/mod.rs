mod api;
mod api_request;
mod interceptor;
mod outcome;
mod request_context;
mod request_processor;
mod resource;
mod status;

pub use request_processor::RequestProcessor;

pub use interceptor::{
    GenericInterceptor, Interceptor, InterceptorChain, InterceptorRegistry, ReceiveInterceptor,
    TransferInterceptor,
};
pub use outcome::{HandlerOutcome, PostStep, PostSteps};
pub use request_context::{AgentContext, RequestContext};
pub use resource::{check_on_exist, write_ack, PathLocks, Repository};
pub use status::{ConfigStatusProvider, StatusProvider};

pub use api::{
    ActionRequest, DeleteRequest, GetRequest, InfoRequest, ListRequest, MergeRequest, PutRequest,
};

use crate::transfer::TransferRequest;

#[derive(Debug)]
pub enum ApiRequest {
    Put(PutRequest),
    Get(GetRequest),
    List(ListRequest),
    Delete(DeleteRequest),
    Info(InfoRequest),
    Action(ActionRequest),
    Transfer(TransferRequest),
}
