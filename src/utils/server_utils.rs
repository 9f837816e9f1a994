#![forbid(unsafe_code)]

use path_absolutize::Absolutize;
use std::ops::Deref;
use std::path::Path;
use chrono::{Local, NaiveDateTime};

use poem::Request;

use log::{debug, LevelFilter};

// Format produced by NaiveDateTime's Display implementation.
#[cfg(test)]
pub const LOCAL_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

// ***************************************************************************
// GENERAL PUBLIC FUNCTIONS
// ***************************************************************************
// ---------------------------------------------------------------------------
// get_absolute_path:
// ---------------------------------------------------------------------------
/** Replace tilde (~) and environment variable values in a path name and
 * then construct the absolute path name.  Unlike canonicalize, absolutize
 * does not care whether the file exists or what the file really is.
 *
 * On any failure the original path is returned unchanged.
 */
pub fn get_absolute_path(path: &str) -> String {
    // Replace ~ and environment variable values if possible.
    let s = match shellexpand::full(path) {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };

    // Convert to absolute path if necessary.
    let p = Path::new(s.deref());
    let p1 = match p.absolutize() {
        Ok(x) => x,
        Err(_) => return path.to_owned(),
    };
    let p2 = match p1.to_str() {
        Some(x) => x,
        None => return path.to_owned(),
    };

    p2.to_owned()
}

// ---------------------------------------------------------------------------
// timestamp_local:
// ---------------------------------------------------------------------------
/** Get the current wall-clock time of the host without timezone information. */
pub fn timestamp_local() -> NaiveDateTime {
    Local::now().naive_local()
}

// ---------------------------------------------------------------------------
// timestamp_local_to_str:
// ---------------------------------------------------------------------------
/** Render a local timestamp using chrono's default representation, which 
 * looks like this:  2022-09-13 14:14:42.719849912
 */
pub fn timestamp_local_to_str(ts: NaiveDateTime) -> String {
    ts.to_string()
}

// ---------------------------------------------------------------------------
// timestamp_str_to_local:
// ---------------------------------------------------------------------------
/** Parse a string produced by timestamp_local_to_str back into a timestamp. */
#[cfg(test)]
pub fn timestamp_str_to_local(ts: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(ts, LOCAL_TIMESTAMP_FORMAT)
}

// ---------------------------------------------------------------------------
// debug_request:
// ---------------------------------------------------------------------------
// Dump http request information to the log.
pub fn debug_request(http_req: &Request) {
    // Check that debug or higher logging is in effect.
    let level = log::max_level();
    if level < LevelFilter::Debug {
        return;
    }
    
    // Accumulate the output.
    let mut s = "\n".to_string();

    // Restate the URI.
    let uri = http_req.uri();
    s += format!("  URI: {:?}\n", uri).as_str();

    // Accumulate the headers
    for v in http_req.headers().iter() {
         s += format!("  Header: {} = {:?} \n", v.0, v.1).as_str();
    };

    // List query parameters.
    if let Some(q) = uri.query() {
        s += format!("  Query Parameters: {:?}\n", q).as_str();
    } else {
        s += "  * No Query Parameters\n";
    }

    // Write the single log record.
    debug!("{}", s);
}
