use surfer_common::ControllerStatus;

/// Pure function of the current state; the parse/dispatch path never
/// touches markup.
pub fn render(status: &ControllerStatus) -> String {
    format!(
        concat!(
            "<!DOCTYPE html><html>",
            "<head><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">",
            "<title>Channel Surfer</title></head>",
            "<body><h1>Channel Surfer</h1>",
            "<p>Current Mode: {mode}</p>",
            "<p>Current Favorite: {channel}</p>",
            "<p>Current delay: {delay}</p>",
            "<form action=\"/favorite-number\" method=\"get\">",
            "<label for=\"favoriteNumberInput\">Enter a Favorite:</label>",
            "<input type=\"text\" id=\"favoriteNumberInput\" name=\"favoriteNumberInput\">",
            "<input type=\"submit\" value=\"Submit\"></form>",
            "<form action=\"/delay-number\" method=\"get\">",
            "<label for=\"delayNumberInput\">Enter a delay (sec):</label>",
            "<input type=\"text\" id=\"delayNumberInput\" name=\"delayNumberInput\">",
            "<input type=\"submit\" value=\"Submit\"></form>",
            "<p><a href=\"/mode/jump-delay\"><button>Jump delay to favorite {channel}</button></a></p>",
            "<p><a href=\"/mode/jump-random\"><button>Jump random to favorite {channel}</button></a></p>",
            "<p><a href=\"/mode/off\"><button>Mode off</button></a></p>",
            "<form action=\"/set-channel\" method=\"get\">",
            "<label for=\"setChannelInput\">Go to channel:</label>",
            "<input type=\"text\" id=\"setChannelInput\" name=\"setChannelInput\">",
            "<input type=\"submit\" value=\"Submit\"></form>",
            "<p><a href=\"/mode/power\"><button>Power</button></a></p>",
            "</body></html>",
        ),
        mode = status.mode_label,
        channel = status.channel,
        delay = status.delay,
    )
}

pub fn http_ok(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body,
    )
}
