use kaleidoscope::config::Options;
use kaleidoscope::toplevel::{self, Session};
use log::error;
use std::process;

#[cfg(not(feature = "llvm"))]
fn session(options: Options) -> kaleidoscope::Result<Session<kaleidoscope::ir::IrBackend>> {
    let mut session = Session::interpreter(options);
    toplevel::register_builtins(session.backend_mut());
    Ok(session)
}

#[cfg(feature = "llvm")]
fn session(options: Options) -> kaleidoscope::Result<Session<kaleidoscope::llvm::LlvmBackend>> {
    Ok(Session::new(kaleidoscope::llvm::LlvmBackend::new()?, options))
}

fn main() {
    env_logger::init();

    let mut session = match session(Options::from_env()) {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            process::exit(1);
        }
    };
    if let Err(e) = toplevel::main_loop(&mut session) {
        error!("{}", e);
        process::exit(1);
    }
}
