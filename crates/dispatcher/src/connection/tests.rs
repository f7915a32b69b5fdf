use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::sync::mpsc::UnboundedReceiver;

use super::*;
use crate::dispatcher::DispatcherInit;
use crate::error::TARGET_CLOSED_MESSAGE;
use crate::validator::{t_channel, t_number, t_object, t_optional, t_string};

struct Browser;

#[derive(Default)]
struct Page {
	calls: AtomicUsize,
	gate: Notify,
}

fn scheme() -> Scheme {
	Scheme::new()
		.params("Root", "initialize", t_object(vec![]))
		.params("Browser", "newPage", t_object(vec![]))
		.params("Page", "goto", t_object(vec![("url", t_string())]))
		.params("Page", "wait", t_object(vec![]))
		.params("Page", "fail", t_object(vec![]))
		.params("Page", "explode", t_object(vec![]))
		.params("Page", "reload", t_object(vec![("timeout", t_optional(t_number()))]))
		.params("Page", "close", t_object(vec![]))
		.params("Page", "apiName", t_object(vec![]))
		.params("Page", "echoPage", t_object(vec![("target", t_channel(&["Page"]))]))
}

fn page_methods() -> MethodTable {
	MethodTable::new()
		.method::<Page, _, _>("goto", |page, call| async move {
			page.calls.fetch_add(1, Ordering::SeqCst);
			let url = call.params.require_str("url")?.to_string();
			Ok(ChannelValue::object([("url", url)]))
		})
		.method::<Page, _, _>("wait", |page, _call| async move {
			page.gate.notified().await;
			Ok(ChannelValue::object([("waited", true)]))
		})
		.handler("fail", |_call| async {
			Err(Error::handler_named("TimeoutError", "Timeout 30000ms exceeded"))
		})
		.handler("explode", explode)
		.handler("close", |call| async move {
			call.dispatcher.dispose()?;
			Ok(ChannelValue::Null)
		})
		.handler("apiName", |call| async move {
			Ok(ChannelValue::from(call.metadata.api_name))
		})
		.handler("echoPage", |call| async move {
			let target = call.params.require_dispatcher("target")?;
			Ok(ChannelValue::object([("page", target)]))
		})
}

async fn explode(_call: Call) -> Result<ChannelValue> {
	panic!("boom")
}

fn browser_methods() -> MethodTable {
	MethodTable::new().handler("newPage", |call| async move {
		let page = Dispatcher::new(
			&call.dispatcher,
			Arc::new(Page::default()),
			DispatcherInit::new("Page", page_methods()).scope(),
		)?;
		Ok(ChannelValue::object([("page", page)]))
	})
}

fn root_methods() -> MethodTable {
	MethodTable::new().handler("initialize", |call| async move {
		let browser = Dispatcher::new(
			&call.dispatcher,
			Arc::new(Browser),
			DispatcherInit::new("Browser", browser_methods())
				.initializer(ChannelValue::object([("version", "1.0")]))
				.scope(),
		)?;
		Ok(ChannelValue::object([("browser", browser)]))
	})
}

fn connection() -> (Arc<DispatcherConnection>, UnboundedReceiver<Value>) {
	let connection = DispatcherConnection::new(ConnectionConfig::default(), scheme(), root_methods());
	let outbound = connection.take_outbound().unwrap();
	(connection, outbound)
}

fn request(id: u64, guid: &str, method: &str, params: Value) -> Request {
	Request {
		id,
		guid: Some(guid.to_string()),
		method: method.to_string(),
		params,
		metadata: None,
	}
}

fn drain(outbound: &mut UnboundedReceiver<Value>) -> Vec<Value> {
	let mut messages = Vec::new();
	while let Ok(message) = outbound.try_recv() {
		messages.push(message);
	}
	messages
}

/// Runs `request` and returns its reply, skipping any pushes before it.
async fn call(
	connection: &Arc<DispatcherConnection>,
	outbound: &mut UnboundedReceiver<Value>,
	request: Request,
) -> Value {
	let id = request.id;
	connection.dispatch(request).await;
	drain(outbound)
		.into_iter()
		.find(|message| message.get("id") == Some(&json!(id)))
		.unwrap()
}

/// Initializes the root and opens one page; returns the page dispatcher.
async fn open_page(
	connection: &Arc<DispatcherConnection>,
	outbound: &mut UnboundedReceiver<Value>,
) -> Arc<Dispatcher> {
	call(connection, outbound, request(1, "", "initialize", json!({}))).await;
	let reply = call(connection, outbound, request(2, "Browser@1", "newPage", json!({}))).await;
	let guid = reply["result"]["page"]["guid"].as_str().unwrap();
	connection.dispatcher(guid).unwrap()
}

fn error_of(reply: &Value) -> (&str, &str) {
	let error = &reply["error"]["error"];
	(
		error["name"].as_str().unwrap(),
		error["message"].as_str().unwrap(),
	)
}

#[tokio::test]
async fn test_initialize_creates_before_reply() {
	let (connection, mut outbound) = connection();

	connection.dispatch(request(1, "", "initialize", json!({}))).await;

	assert_eq!(
		drain(&mut outbound),
		vec![
			json!({
				"guid": "",
				"method": "__create__",
				"params": {"type": "Browser", "initializer": {"version": "1.0"}, "guid": "Browser@1"}
			}),
			json!({"id": 1, "result": {"browser": {"guid": "Browser@1"}}}),
		]
	);
}

#[tokio::test]
async fn test_unknown_guid_is_target_closed() {
	let (connection, mut outbound) = connection();

	let reply = call(&connection, &mut outbound, request(7, "Page@42", "goto", json!({"url": "x"}))).await;
	assert_eq!(error_of(&reply), ("TargetClosedError", TARGET_CLOSED_MESSAGE));
}

#[tokio::test]
async fn test_disposed_target_never_reaches_handler() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;
	let object = page.object::<Page>().unwrap();

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "close", json!({}))).await;
	assert_eq!(reply, json!({"id": 3}));

	let reply = call(&connection, &mut outbound, request(4, page.guid(), "goto", json!({"url": "x"}))).await;
	assert_eq!(error_of(&reply).0, "TargetClosedError");
	assert_eq!(object.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_dispose_between_routing_and_handler() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;
	let object = page.object::<Page>().unwrap();

	let Routed::Call(pending) = connection.route(request(3, page.guid(), "goto", json!({"url": "x"}))) else {
		panic!("Expected request to be routed to a handler");
	};
	page.dispose().unwrap();

	let response = connection.complete(pending).await;
	assert_eq!(
		response.error.unwrap().error.name.as_deref(),
		Some("TargetClosedError")
	);
	assert_eq!(object.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_validation_error_names_path() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "goto", json!({"url": 5}))).await;
	assert_eq!(
		error_of(&reply),
		("ValidationError", "url: expected string, got number")
	);
}

#[tokio::test]
async fn test_unknown_scheme() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "frobnicate", json!({}))).await;
	assert_eq!(
		error_of(&reply),
		("ValidationError", "Unknown scheme for Page.frobnicate")
	);
}

#[tokio::test]
async fn test_method_missing_from_table() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "reload", json!({}))).await;
	assert_eq!(
		error_of(&reply),
		("Error", "Mismatching dispatcher: \"Page\" does not implement \"reload\"")
	);
}

#[tokio::test]
async fn test_handler_error_keeps_name() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "fail", json!({}))).await;
	assert_eq!(error_of(&reply), ("TimeoutError", "Timeout 30000ms exceeded"));
}

#[tokio::test]
async fn test_handler_panic_becomes_error_reply() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, page.guid(), "explode", json!({}))).await;
	let (name, message) = error_of(&reply);
	assert_eq!(name, "Error");
	assert_eq!(message, "Page.explode handler panicked: boom");

	// The connection keeps serving.
	let reply = call(&connection, &mut outbound, request(4, page.guid(), "goto", json!({"url": "a"}))).await;
	assert_eq!(reply, json!({"id": 4, "result": {"url": "a"}}));
}

#[tokio::test]
async fn test_references_resolve_and_substitute() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(
		&connection,
		&mut outbound,
		request(3, page.guid(), "echoPage", json!({"target": {"guid": page.guid()}})),
	)
	.await;
	assert_eq!(reply, json!({"id": 3, "result": {"page": {"guid": page.guid()}}}));
}

#[tokio::test]
async fn test_reference_errors() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(
		&connection,
		&mut outbound,
		request(3, page.guid(), "echoPage", json!({"target": {"guid": "Page@99"}})),
	)
	.await;
	assert_eq!(
		error_of(&reply),
		("ValidationError", "target: no object with guid Page@99")
	);

	let reply = call(
		&connection,
		&mut outbound,
		request(4, page.guid(), "echoPage", json!({"target": {"guid": "Browser@1"}})),
	)
	.await;
	assert_eq!(
		error_of(&reply),
		(
			"ValidationError",
			"target: object with guid Browser@1 has type Browser, expected Page"
		)
	);
}

#[tokio::test]
async fn test_metadata_reaches_handler() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let mut with_metadata = request(3, page.guid(), "apiName", json!({}));
	with_metadata.metadata = Some(json!({"apiName": "page.title", "wallTime": 1700000000000i64}));
	let reply = call(&connection, &mut outbound, with_metadata).await;
	assert_eq!(reply, json!({"id": 3, "result": "page.title"}));

	let mut bad_metadata = request(4, page.guid(), "apiName", json!({}));
	bad_metadata.metadata = Some(json!({"wallTime": "soon"}));
	let reply = call(&connection, &mut outbound, bad_metadata).await;
	let (name, message) = error_of(&reply);
	assert_eq!(name, "ValidationError");
	assert!(message.starts_with("metadata: "), "{message}");
}

#[tokio::test]
async fn test_replies_complete_out_of_order() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;
	let object = page.object::<Page>().unwrap();

	let slow = {
		let connection = Arc::clone(&connection);
		let request = request(3, page.guid(), "wait", json!({}));
		tokio::spawn(async move { connection.dispatch(request).await })
	};
	connection
		.dispatch(request(4, page.guid(), "goto", json!({"url": "b"})))
		.await;

	assert_eq!(outbound.recv().await.unwrap()["id"], 4);

	object.gate.notify_one();
	slow.await.unwrap();
	assert_eq!(
		outbound.recv().await.unwrap(),
		json!({"id": 3, "result": {"waited": true}})
	);
}

#[tokio::test]
async fn test_close_answers_running_calls_once() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;
	let object = page.object::<Page>().unwrap();

	let slow = {
		let connection = Arc::clone(&connection);
		let request = request(3, page.guid(), "wait", json!({}));
		tokio::spawn(async move { connection.dispatch(request).await })
	};
	while connection.in_flight_len() == 0 {
		tokio::task::yield_now().await;
	}

	connection.on_close();
	let reply = outbound.recv().await.unwrap();
	assert_eq!(reply["id"], 3);
	assert_eq!(error_of(&reply), ("TargetClosedError", TARGET_CLOSED_MESSAGE));
	assert_eq!(connection.in_flight_len(), 0);

	// The handler still finishes, but its result is not sent a second time.
	object.gate.notify_one();
	slow.await.unwrap();
	assert!(outbound.recv().await.is_none());
}

#[test]
fn test_request_without_guid_is_target_closed() {
	let request = decode_request(r#"{"id": 5, "method": "greet", "params": {}}"#).unwrap();
	assert!(request.guid.is_none());

	let (connection, _outbound) = connection();
	let Routed::Reply(reply) = connection.route(request) else {
		panic!("Expected an immediate reply");
	};
	assert_eq!(reply.id, 5);
	assert_eq!(
		reply.error.unwrap().error.name.as_deref(),
		Some("TargetClosedError")
	);
}

#[test]
fn test_decode_accepts_ids_past_u32() {
	let request = decode_request(r#"{"id": 4294967296, "guid": "", "method": "initialize"}"#).unwrap();
	assert_eq!(request.id, 4_294_967_296);
}

#[test]
fn test_malformed_request_with_id_gets_validation_error() {
	let Err(Some(reply)) = decode_request(r#"{"id": 9, "guid": 3, "method": "goto"}"#) else {
		panic!("Expected a reply for a malformed request");
	};
	assert_eq!(reply.id, 9);
	assert_eq!(
		reply.error.unwrap().error.name.as_deref(),
		Some("ValidationError")
	);
}

#[test]
fn test_payload_without_id_gets_no_reply() {
	assert!(matches!(decode_request(r#"{"not": "a request"}"#), Err(None)));
	assert!(matches!(decode_request("not json"), Err(None)));
}

#[tokio::test]
async fn test_send_message_to_client() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	connection
		.send_message_to_client(page.guid(), "load", ChannelValue::object([("page", &page)]), false)
		.unwrap();
	assert_eq!(
		drain(&mut outbound),
		vec![json!({"guid": page.guid(), "method": "load", "params": {"page": {"guid": page.guid()}}})]
	);

	connection
		.send_message_to_client(page.guid(), "console", ChannelValue::object([("text", "hi")]), true)
		.unwrap();
	assert_eq!(
		drain(&mut outbound),
		vec![json!({"guid": page.guid(), "method": "console", "params": {"text": "hi"}})]
	);

	let err = connection
		.send_message_to_client(
			page.guid(),
			"load",
			ChannelValue::object([("nested", ChannelValue::object([("page", &page)]))]),
			true,
		)
		.unwrap_err();
	assert!(err.is_contract_violation());
	assert!(drain(&mut outbound).is_empty());
}

#[tokio::test]
async fn test_debug_scope_state() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	let reply = call(&connection, &mut outbound, request(3, "", DEBUG_SCOPE_STATE_METHOD, json!({}))).await;
	assert_eq!(
		reply["result"],
		json!({
			"_guid": "",
			"objects": [{
				"_guid": "Browser@1",
				"objects": [{"_guid": page.guid(), "objects": []}]
			}]
		})
	);
}

#[tokio::test]
async fn test_on_close_disposes_silently() {
	let (connection, mut outbound) = connection();
	let page = open_page(&connection, &mut outbound).await;

	connection.on_close();
	connection.on_close();

	assert!(connection.is_closed());
	assert!(page.is_disposed());
	assert!(connection.root().is_disposed());
	assert!(connection.dispatcher(page.guid()).is_none());
	assert_eq!(connection.dispatcher_count(), 0);

	// No pushes for the teardown and the outbound stream ends.
	assert!(outbound.recv().await.is_none());

	let err = Dispatcher::new(
		connection.root(),
		Arc::new(Browser),
		DispatcherInit::new("Browser", MethodTable::new()),
	)
	.unwrap_err();
	assert!(err.is_contract_violation());
	assert!(page.push_event("close", ChannelValue::Null).is_ok());
}

#[tokio::test]
async fn test_run_can_only_be_called_once() {
	let (connection, _outbound) = connection();
	let (_peer_read, writer) = tokio::io::duplex(64);
	let (reader, _peer_write) = tokio::io::duplex(64);
	let (transport, rx) = crate::transport::PipeTransport::new(writer, reader);

	let err = connection.run(transport.into_transport_parts(rx)).await.unwrap_err();
	assert!(err.is_contract_violation());
}
