//! Symphonia + cpal audio engine
//!
//! Files are opened on the caller's thread so open failures come back from
//! `play`/`enqueue` directly. Decoders are then handed to a render thread
//! that owns the output stream, feeds it, and moves on to the queued
//! decoder at end of file without closing the stream.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{ AtomicBool, AtomicU32, AtomicU64, Ordering };
use std::sync::mpsc::{ self, Receiver, RecvTimeoutError, Sender, TryRecvError };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rubato::{ FastFixedOut, PolynomialDegree, Resampler as _ };
use tokio::sync::mpsc::UnboundedSender;

use crate::decoder::Decoder;
use crate::engine::{ AudioEngine, EngineError, EngineEvent, PlaybackState, Progress };
use crate::output::AudioOutput;


/// How long the render thread sleeps when it has nothing to decode.
const IDLE_TICK: Duration = Duration::from_millis( 10 );

/// Output chunk size for the resampler, in frames.
const RESAMPLE_CHUNK: usize = 1024;


enum Control {
    Play( Decoder ),
    Enqueue( Decoder ),
    Pause,
    Resume,
    Stop,
    ClearQueue,
    Seek( f64 ),
    Shutdown,
}


/// Position of the rendering track, readable from any thread.
#[derive( Default )]
struct Position {
    active: AtomicBool,
    frames: AtomicU64,
    sample_rate: AtomicU32,
    /// Duration in milliseconds, 0 when unknown.
    duration_ms: AtomicU64,
}


impl Position {
    fn begin( &self, decoder: &Decoder ) {
        self.frames.store( 0, Ordering::Relaxed );
        self.sample_rate.store( decoder.sample_rate(), Ordering::Relaxed );
        let millis = decoder.duration().map_or( 0, |d| d.as_millis() as u64 );
        self.duration_ms.store( millis, Ordering::Relaxed );
        self.active.store( true, Ordering::Release );
    }


    fn end( &self ) {
        self.active.store( false, Ordering::Release );
    }


    fn snapshot( &self ) -> Option<Progress> {
        if !self.active.load( Ordering::Acquire ) {
            return None;
        }
        let rate = self.sample_rate.load( Ordering::Relaxed ).max( 1 );
        let frames = self.frames.load( Ordering::Relaxed );
        let millis = self.duration_ms.load( Ordering::Relaxed );

        Some( Progress {
            elapsed: Duration::from_secs_f64( frames as f64 / rate as f64 ),
            duration: ( millis > 0 ).then( || Duration::from_millis( millis ) ),
        })
    }
}


/// Audio engine backed by a render thread.
pub struct Renderer {
    control: Sender<Control>,
    position: Arc<Position>,
    thread: Option<thread::JoinHandle<()>>,
}


impl Renderer {
    /// Starts the render thread; its events are sent to `events`.
    ///
    /// The output device is opened when the first track starts.
    pub fn new( events: UnboundedSender<EngineEvent> ) -> Self {
        let ( control, receiver ) = mpsc::channel();
        let position = Arc::new( Position::default() );
        let thread_position = Arc::clone( &position );

        let thread = thread::Builder::new()
            .name( "folio-render".into() )
            .spawn( move || RenderThread::new( receiver, events, thread_position ).run() )
            .map_err( |e| tracing::error!( "Failed to start render thread: {}", e ) )
            .ok();

        Self { control, position, thread }
    }


    fn send( &self, message: Control ) -> Result<(), EngineError> {
        self.control.send( message ).map_err( |_| EngineError::Disconnected )
    }


    fn send_quietly( &self, message: Control ) {
        if self.send( message ).is_err() {
            tracing::warn!( "Render thread is gone" );
        }
    }
}


impl AudioEngine for Renderer {
    fn play( &mut self, url: &Path ) -> Result<(), EngineError> {
        let decoder = Decoder::open( url )?;
        self.send( Control::Play( decoder ) )
    }


    fn enqueue( &mut self, url: &Path ) -> Result<(), EngineError> {
        let decoder = Decoder::open( url )?;
        self.send( Control::Enqueue( decoder ) )
    }


    fn pause( &mut self ) {
        self.send_quietly( Control::Pause );
    }


    fn resume( &mut self ) {
        self.send_quietly( Control::Resume );
    }


    fn stop( &mut self ) {
        self.send_quietly( Control::Stop );
    }


    fn clear_queue( &mut self ) {
        self.send_quietly( Control::ClearQueue );
    }


    fn seek( &mut self, fraction: f64 ) {
        self.send_quietly( Control::Seek( fraction ) );
    }


    fn progress( &self ) -> Option<Progress> {
        self.position.snapshot()
    }
}


impl Drop for Renderer {
    fn drop( &mut self ) {
        let _ = self.control.send( Control::Shutdown );
        if let Some( thread ) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!( "Render thread panicked" );
            }
        }
    }
}


/// Planar buffering in front of rubato.
struct Resampler {
    inner: FastFixedOut<f32>,
    pending: Vec<Vec<f32>>,
}


impl Resampler {
    fn new( from: u32, to: u32, channels: usize ) -> Result<Self, EngineError> {
        let inner = FastFixedOut::<f32>::new(
            to as f64 / from as f64,
            2.0,
            PolynomialDegree::Cubic,
            RESAMPLE_CHUNK,
            channels,
        ).map_err( |e| EngineError::Output( format!( "Failed to create resampler: {}", e ) ) )?;

        tracing::info!( "Resampling {} Hz -> {} Hz", from, to );
        Ok( Self { inner, pending: vec![ Vec::new(); channels ] } )
    }


    /// Buffers interleaved `samples` and returns whatever could be resampled.
    fn process( &mut self, samples: &[f32] ) -> Vec<f32> {
        let channels = self.pending.len();
        for frame in samples.chunks_exact( channels ) {
            for ( lane, sample ) in self.pending.iter_mut().zip( frame ) {
                lane.push( *sample );
            }
        }

        let mut out = Vec::new();
        while self.pending[ 0 ].len() >= self.inner.input_frames_next() {
            let needed = self.inner.input_frames_next();
            let chunk: Vec<Vec<f32>> = self.pending.iter_mut().map( |lane| lane.drain( ..needed ).collect() ).collect();
            match self.inner.process( &chunk, None ) {
                Ok( resampled ) => interleave_into( &resampled, &mut out ),
                Err( e ) => {
                    tracing::error!( "Resample error: {}", e );
                    break;
                }
            }
        }
        out
    }


    /// Resamples whatever is left at end of file.
    fn flush( &mut self ) -> Vec<f32> {
        let mut out = Vec::new();
        if self.pending[ 0 ].is_empty() {
            return out;
        }
        match self.inner.process_partial( Some( self.pending.as_slice() ), None ) {
            Ok( resampled ) => interleave_into( &resampled, &mut out ),
            Err( e ) => tracing::error!( "Final resample error: {}", e ),
        }
        self.pending.iter_mut().for_each( Vec::clear );
        out
    }
}


/// [[L0, L1], [R0, R1]] → [L0, R0, L1, R1]
fn interleave_into( planar: &[Vec<f32>], out: &mut Vec<f32> ) {
    let frames = planar.first().map_or( 0, Vec::len );
    out.reserve( frames * planar.len() );
    for f in 0..frames {
        out.extend( planar.iter().map( |lane| lane[ f ] ) );
    }
}


/// One decoder being rendered.
struct Track {
    decoder: Decoder,
    resampler: Option<Resampler>,
}


enum Phase {
    Idle,
    Rendering( Track ),
    /// Decoding is done; waiting for the device to play out the queue.
    Draining,
}


struct RenderThread {
    control: Receiver<Control>,
    events: UnboundedSender<EngineEvent>,
    position: Arc<Position>,
    output: Option<AudioOutput>,
    phase: Phase,
    queue: VecDeque<Decoder>,
    paused: bool,
    running: bool,
}


impl RenderThread {
    fn new( control: Receiver<Control>, events: UnboundedSender<EngineEvent>, position: Arc<Position> ) -> Self {
        Self {
            control,
            events,
            position,
            output: None,
            phase: Phase::Idle,
            queue: VecDeque::new(),
            paused: false,
            running: true,
        }
    }


    fn run( mut self ) {
        tracing::debug!( "Render thread started" );

        loop {
            if !self.running {
                break;
            }

            let message = match self.phase {
                Phase::Idle => match self.control.recv() {
                    Ok( message ) => Some( message ),
                    Err( _ ) => break,
                },
                Phase::Rendering( _ ) if !self.paused => match self.control.try_recv() {
                    Ok( message ) => Some( message ),
                    Err( TryRecvError::Empty ) => None,
                    Err( TryRecvError::Disconnected ) => break,
                },
                _ => match self.control.recv_timeout( IDLE_TICK ) {
                    Ok( message ) => Some( message ),
                    Err( RecvTimeoutError::Timeout ) => None,
                    Err( RecvTimeoutError::Disconnected ) => break,
                },
            };

            match message {
                Some( Control::Shutdown ) => break,
                Some( message ) => self.handle( message ),
                None => self.render_step(),
            }
        }

        self.position.end();
        tracing::debug!( "Render thread finished" );
    }


    fn handle( &mut self, message: Control ) {
        match message {
            Control::Play( decoder ) => {
                self.queue.clear();
                self.flush_output();
                self.set_paused( false );
                if self.begin( decoder ) {
                    self.emit( EngineEvent::StateChanged( PlaybackState::Playing ) );
                    self.emit( EngineEvent::NowPlayingChanged );
                }
            }
            Control::Enqueue( decoder ) => self.queue.push_back( decoder ),
            Control::ClearQueue => self.queue.clear(),
            Control::Pause => {
                if !matches!( self.phase, Phase::Idle ) && !self.paused {
                    self.set_paused( true );
                    self.emit( EngineEvent::StateChanged( PlaybackState::Paused ) );
                }
            }
            Control::Resume => {
                if self.paused {
                    self.set_paused( false );
                    self.emit( EngineEvent::StateChanged( PlaybackState::Playing ) );
                }
            }
            Control::Stop => {
                if !matches!( self.phase, Phase::Idle ) {
                    self.flush_output();
                    self.finish();
                }
            }
            Control::Seek( fraction ) => {
                let Phase::Rendering( track ) = &mut self.phase else { return };
                match track.decoder.seek_fraction( fraction ) {
                    Ok( target ) => {
                        let frames = target.as_secs_f64() * track.decoder.sample_rate() as f64;
                        self.position.frames.store( frames as u64, Ordering::Relaxed );
                        self.flush_output();
                    }
                    Err( e ) => tracing::warn!( "Seek failed: {}", e ),
                }
            }
            Control::Shutdown => {}
        }
    }


    /// Makes `decoder` the rendering track. On failure the session ends.
    fn begin( &mut self, decoder: Decoder ) -> bool {
        match self.prepare( decoder ) {
            Ok( track ) => {
                self.position.begin( &track.decoder );
                self.phase = Phase::Rendering( track );
                true
            }
            Err( e ) => {
                tracing::error!( "Cannot render track: {}", e );
                self.emit( EngineEvent::Error( e.to_string() ) );
                self.finish();
                false
            }
        }
    }


    fn prepare( &mut self, decoder: Decoder ) -> Result<Track, EngineError> {
        if self.output.is_none() {
            let output = AudioOutput::open().map_err( |e| EngineError::Output( e.to_string() ) )?;
            self.output = Some( output );
        }
        let device_rate = self.output.as_ref().map_or( decoder.sample_rate(), AudioOutput::sample_rate );

        let resampler = if decoder.sample_rate() != device_rate {
            Some( Resampler::new( decoder.sample_rate(), device_rate, decoder.channels() )? )
        } else {
            None
        };
        Ok( Track { decoder, resampler } )
    }


    fn render_step( &mut self ) {
        if self.paused {
            return;
        }
        let Some( output ) = self.output.as_ref() else { return };
        let queue = Arc::clone( output.queue() );

        let Phase::Rendering( track ) = &mut self.phase else {
            // Draining; a late enqueue still continues the session
            if !self.queue.is_empty() {
                self.next_track();
            } else if queue.is_empty() {
                self.finish();
            }
            return;
        };

        // Keep about 50 ms ahead of the device
        let target = output.sample_rate() as usize * queue.channels() / 20;
        if queue.len() > target {
            thread::sleep( Duration::from_millis( 5 ) );
            return;
        }

        let channels = track.decoder.channels();
        let samples = match track.decoder.decode_next() {
            Ok( Some( samples ) ) => {
                self.position.frames.fetch_add( ( samples.len() / channels ) as u64, Ordering::Relaxed );
                match &mut track.resampler {
                    Some( resampler ) => resampler.process( &samples ),
                    None => samples,
                }
            }
            Ok( None ) => {
                let tail = track.resampler.as_mut().map( Resampler::flush ).unwrap_or_default();
                self.feed( &tail, channels );
                self.next_track();
                return;
            }
            Err( e ) => {
                tracing::error!( "Decode error: {}", e );
                self.emit( EngineEvent::Error( e.to_string() ) );
                self.flush_output();
                self.finish();
                return;
            }
        };

        self.feed( &samples, channels );
    }


    /// Continues with the queued decoder, or drains when there is none.
    fn next_track( &mut self ) {
        match self.queue.pop_front() {
            Some( decoder ) => {
                tracing::debug!( "Continuing gaplessly" );
                if self.begin( decoder ) {
                    self.emit( EngineEvent::NowPlayingChanged );
                }
            }
            None => {
                tracing::debug!( "End of queue, draining output" );
                self.phase = Phase::Draining;
            }
        }
    }


    /// Pushes samples into the output queue, blocking while it is full.
    fn feed( &mut self, samples: &[f32], channels: usize ) {
        let Some( output ) = self.output.as_ref() else { return };
        let queue = Arc::clone( output.queue() );

        let mut offset = 0;
        while offset < samples.len() {
            let pushed = queue.push( &samples[ offset.. ], channels );
            offset += pushed;
            if pushed == 0 {
                // A stop or new track must not wait behind a full buffer
                if !self.poll_interrupt() {
                    return;
                }
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }


    /// Handles a pending control message. Returns false if the samples
    /// being fed belong to a track that is no longer current.
    fn poll_interrupt( &mut self ) -> bool {
        let message = match self.control.try_recv() {
            Ok( message ) => message,
            Err( TryRecvError::Empty ) => return true,
            Err( TryRecvError::Disconnected ) => Control::Shutdown,
        };

        let keep = matches!(
            message,
            Control::Enqueue( _ ) | Control::ClearQueue | Control::Pause | Control::Resume
        );
        if let Control::Shutdown = message {
            self.flush_output();
            self.finish_quietly();
            self.running = false;
        } else {
            self.handle( message );
        }
        keep
    }


    fn flush_output( &self ) {
        if let Some( output ) = &self.output {
            output.queue().clear();
        }
    }


    fn set_paused( &mut self, paused: bool ) {
        self.paused = paused;
        if let Some( output ) = &self.output {
            output.set_paused( paused );
        }
    }


    /// Ends the session and reports it stopped.
    fn finish( &mut self ) {
        self.finish_quietly();
        self.emit( EngineEvent::StateChanged( PlaybackState::Stopped ) );
    }


    fn finish_quietly( &mut self ) {
        self.phase = Phase::Idle;
        self.queue.clear();
        self.set_paused( false );
        self.position.end();
    }


    fn emit( &self, event: EngineEvent ) {
        if self.events.send( event ).is_err() {
            tracing::debug!( "No listener for engine events" );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_interleave() {
        let mut out = Vec::new();
        interleave_into( &[ vec![ 1.0, 2.0 ], vec![ 3.0, 4.0 ] ], &mut out );
        assert_eq!( out, vec![ 1.0, 3.0, 2.0, 4.0 ] );
    }


    #[test]
    fn test_position_reports_only_while_active() {
        let position = Position::default();
        assert!( position.snapshot().is_none() );

        position.sample_rate.store( 48000, Ordering::Relaxed );
        position.frames.store( 96000, Ordering::Relaxed );
        position.active.store( true, Ordering::Release );
        let progress = position.snapshot().unwrap();
        assert_eq!( progress.elapsed, Duration::from_secs( 2 ) );
        assert_eq!( progress.duration, None );

        position.end();
        assert!( position.snapshot().is_none() );
    }


    #[test]
    fn test_play_missing_file_fails_synchronously() {
        let ( events, mut rx ) = tokio::sync::mpsc::unbounded_channel();
        let mut renderer = Renderer::new( events );

        let result = renderer.play( Path::new( "/nonexistent/folio/01.flac" ) );
        assert!( matches!( result, Err( EngineError::FileOpen( _ ) ) ) );
        assert!( renderer.progress().is_none() );

        // Transport calls on an idle engine produce no events
        renderer.pause();
        renderer.stop();
        drop( renderer );
        assert!( rx.try_recv().is_err() );
    }
}
