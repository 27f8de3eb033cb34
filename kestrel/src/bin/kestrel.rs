// Copyright (c) 2024 Kestrel Authors. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use kestrel::error::Error;
use kestrel::server::run_server;

fn main() -> Result<(), Error> {
    run_server()
}
