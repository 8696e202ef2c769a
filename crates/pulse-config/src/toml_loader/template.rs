//! Default TOML config template with inline documentation comments.

/// Generate the default TOML config content with comments.
pub(crate) fn default_config_toml() -> String {
    r##"# Pulse Configuration
# Schema version 1
# Only override what you want to change -- missing fields use defaults.

[identity]
# user_id = ""              # generated on first run if empty
# name = "Ada"
# contact = "ada@example.com"
# avatar_ref = ""

[transport]
# endpoint = "ws://127.0.0.1:9470/ws"
# api_key = ""
# heartbeat_interval = 25   # seconds, 5-300
# connect_timeout = 15      # seconds, 1-120

[reconnect]
# retry_delay = 5           # seconds between retries, 1-3600
# max_retries = 10          # 0-100; manual reconnect still works after

[presence]
# enter_timeout = 10        # seconds, 1-120
# enter_retries = 3         # 0-10
# enter_retry_delay = 2     # seconds, linear backoff base, 1-60
# refresh_delay_ms = 750    # coalesced roster refresh delay, 50-10000
# refresh_interval = 45     # periodic full refresh, seconds, 5-3600
# leave_grace_ms = 1500     # teardown leave-ack grace, 0-10000

[persistence]
# base_url = ""             # empty disables durable status writes
# access_token = ""
# request_timeout = 10      # seconds, 1-120
# debounce_ms = 400         # durable write debounce window, 50-10000

[logging]
# level = "info"            # debug, info, warning, error
"##
    .to_string()
}
