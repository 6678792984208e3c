use crate::conn::WireConn;
use crate::error::{ArborError, ArborGenericError, ArborResult, ArborResultExt, FailureLink, WireFailure};
use crate::item::Item;
use crate::tuple::{parse_tuple, Arg, Fields};
use bumpalo::Bump;
use std::io::{Read, Write};

/// handler invoked with the connection, the caller's context, the parameter
/// list of the command, and the per-exchange arena
///
/// a handler writes its own `success` response; a returned error becomes a
/// `failure` response (or propagates, see [DispatchOpts])
pub type Handler<S, C> =
    for<'b> fn(&mut WireConn<S>, &mut C, &'b [Item<'b>], &'b Bump) -> ArborResult<()>;

pub struct CmdEntry<S, C> {
    pub name: &'static str,
    pub handler: Handler<S, C>,
    /// the loop exits after this command's response is written
    pub terminal: bool,
}

impl<S, C> CmdEntry<S, C> {
    pub fn new(name: &'static str, handler: Handler<S, C>) -> Self {
        Self { name, handler, terminal: false }
    }

    pub fn terminal(name: &'static str, handler: Handler<S, C>) -> Self {
        Self { name, handler, terminal: true }
    }
}

#[derive(Default)]
pub struct DispatchOpts<'a> {
    /// propagate handler errors to the caller instead of reporting them as
    /// `failure` responses
    pub pass_through_errors: bool,
    /// polled between commands; a positive reading unwinds with `Cancelled`
    pub cancel: Option<&'a dyn Fn() -> bool>,
}

fn malformed(msg: impl Into<String>) -> ArborGenericError {
    ArborError::MalformedData(msg.into()).into()
}

/// read commands of the form `( word ( params... ) )`, dispatch them through
/// `table`, and answer each with a `success` or `failure` response
///
/// returns when a terminal command completes, the peer hangs up, or a
/// transport-fatal error poisons the connection
pub fn serve_loop<S: Read + Write, C>(
    conn: &mut WireConn<S>,
    ctx: &mut C,
    table: &[CmdEntry<S, C>],
    opts: DispatchOpts<'_>,
) -> ArborResult<()> {
    let mut arena = Bump::new();
    loop {
        arena.reset();
        if let Some(cancel) = opts.cancel {
            if cancel() {
                return Err(ArborError::Cancelled.into());
            }
        }

        let list = conn.read_tuple(&arena)?;
        let cmd = parse_tuple(list, "wl")?;
        let word = cmd.word(0)?;
        let params = cmd.list(1)?;

        // linear lookup, first match wins; the table is fixed at startup
        let entry = table.iter().find(|entry| entry.name == word);
        let result = match entry {
            Some(entry) => (entry.handler)(conn, ctx, params, &arena),
            None => Err(ArborError::UnknownCmd(word.to_owned()).into()),
        };

        if let Err(err) = result {
            if err.is_transport_fatal() {
                return Err(err);
            }
            let is_cmd_err =
                matches!(err.downcast_ref::<ArborError>(), Some(ArborError::CmdErr(..)));
            if opts.pass_through_errors && !is_cmd_err {
                return Err(err);
            }
            let failure = WireFailure::from_generic(&err, file!(), line!());
            debug!("command `{}` failed: {}", word, failure);
            conn.write_failure(&failure)?;
        }

        if matches!(entry, Some(entry) if entry.terminal) {
            conn.flush()?;
            return Ok(());
        }
    }
}

impl<S: Read + Write> WireConn<S> {
    /// write `( name ( args... ) ) `
    pub fn write_cmd(&mut self, name: &str, fmt: &str, args: &[Arg<'_>]) -> ArborResult<()> {
        self.start_list()?;
        self.write_word(name)?;
        self.write_tuple(fmt, args)?;
        self.end_list()
    }

    pub fn write_success(&mut self, fmt: &str, args: &[Arg<'_>]) -> ArborResult<()> {
        self.write_cmd("success", fmt, args)
    }

    /// write `( failure ( ( code message file line )... ) ) `, outermost
    /// cause first
    pub fn write_failure(&mut self, failure: &WireFailure) -> ArborResult<()> {
        self.start_list()?;
        self.write_word("failure")?;
        self.start_list()?;
        for link in failure.links().iter().rev() {
            self.start_list()?;
            self.write_number(link.code as u64)?;
            self.write_str(link.message.as_bytes())?;
            self.write_str(link.file.as_bytes())?;
            self.write_number(link.line as u64)?;
            self.end_list()?;
        }
        self.end_list()?;
        self.end_list()
    }

    /// read one response; a `success` body is parsed against `fmt`, a
    /// `failure` is rebuilt into an error chain with the innermost cause first
    pub fn read_response<'b>(&mut self, arena: &'b Bump, fmt: &str) -> ArborResult<Fields<'b>> {
        let list = self.read_tuple(arena)?;
        let outer = parse_tuple(list, "wl")?;
        match outer.word(0)? {
            "success" => parse_tuple(outer.list(1)?, fmt),
            "failure" => Err(parse_failure(outer.list(1)?)?.into()),
            word => Err(malformed(format!("unexpected response status `{}`", word))),
        }
    }
}

/// reverse a wire failure body (outermost cause first) back into an
/// innermost-first chain
pub fn parse_failure(entries: &[Item<'_>]) -> ArborResult<WireFailure> {
    if entries.is_empty() {
        return Err(malformed("empty failure body"));
    }
    let mut links = Vec::with_capacity(entries.len());
    for entry in entries.iter().rev() {
        let entry = entry.as_list().ok_or_else(|| malformed("failure entry is not a list"))?;
        let fields = parse_tuple(entry, "nssn")?;
        links.push(FailureLink {
            code: u32::try_from(fields.number(0)?)
                .map_err(|_| malformed("error code does not fit in 32 bits"))?,
            message: String::from_utf8_lossy(fields.bytes(1)?).into_owned(),
            file: String::from_utf8_lossy(fields.bytes(2)?).into_owned(),
            line: u32::try_from(fields.number(3)?)
                .map_err(|_| malformed("line number does not fit in 32 bits"))?,
        });
    }
    Ok(WireFailure::new(links))
}
