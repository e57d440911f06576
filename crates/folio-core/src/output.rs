//! Audio output via cpal
//!
//! One output stream serves a whole session. Decoded samples are converted
//! to the device's channel layout as they are queued, so consecutive tracks
//! with different layouts can share the stream.

use std::collections::VecDeque;
use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::{ Arc, Mutex, MutexGuard, PoisonError };

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use thiserror::Error;


/// Errors that can occur with audio output.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to get default stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),
}


/// Samples waiting for the audio callback, already in the device layout.
pub struct SampleQueue {
    buffer: Mutex<VecDeque<f32>>,
    capacity: usize,
    channels: usize,
    paused: AtomicBool,
}


impl SampleQueue {
    /// Creates a queue holding at most `capacity` samples for a device with `channels` channels.
    pub fn new( capacity: usize, channels: usize ) -> Self {
        Self {
            buffer: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            channels: channels.max( 1 ),
            paused: AtomicBool::new( false ),
        }
    }


    /// Queues whole frames of `samples`, remapping from `source_channels`.
    ///
    /// Returns how many source samples were consumed; 0 means the queue is full.
    pub fn push( &self, samples: &[f32], source_channels: usize ) -> usize {
        let source_channels = source_channels.max( 1 );
        let mut buf = self.lock();

        let room = self.capacity.saturating_sub( buf.len() ) / self.channels;
        let frames = ( samples.len() / source_channels ).min( room );

        for frame in samples.chunks_exact( source_channels ).take( frames ) {
            if source_channels == self.channels {
                buf.extend( frame.iter().copied() );
            } else if self.channels == 1 {
                buf.push_back( frame.iter().sum::<f32>() / source_channels as f32 );
            } else {
                // Extra device channels repeat the last source channel
                buf.extend( ( 0..self.channels ).map( |ch| frame[ ch.min( source_channels - 1 ) ] ) );
            }
        }

        frames * source_channels
    }


    /// Fills `output` from the queue, padding with silence.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        if self.paused.load( Ordering::Relaxed ) {
            output.fill( 0.0 );
            return 0;
        }

        let mut buf = self.lock();
        let written = output.len().min( buf.len() );
        for ( slot, sample ) in output.iter_mut().zip( buf.drain( ..written ) ) {
            *slot = sample;
        }
        output[ written.. ].fill( 0.0 );
        written
    }


    pub fn len( &self ) -> usize {
        self.lock().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.lock().is_empty()
    }


    pub fn clear( &self ) {
        self.lock().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    fn lock( &self ) -> MutexGuard<'_, VecDeque<f32>> {
        self.buffer.lock().unwrap_or_else( PoisonError::into_inner )
    }
}


/// The device stream.
///
/// `cpal::Stream` is not `Send`; keep this on the thread that opened it.
pub struct AudioOutput {
    stream: cpal::Stream,
    sample_rate: u32,
    queue: Arc<SampleQueue>,
}


impl AudioOutput {
    /// Opens the default device in its default configuration.
    pub fn open() -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or( OutputError::NoDevice )?;

        let config = device
            .default_output_config()
            .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
            .config();

        tracing::info!(
            "Output device {:?}: {} Hz, {} channels",
            device.name().unwrap_or_default(),
            config.sample_rate.0,
            config.channels
        );

        // About half a second of audio
        let capacity = config.sample_rate.0 as usize * config.channels as usize / 2;
        let queue = Arc::new( SampleQueue::new( capacity, config.channels as usize ) );
        let callback_queue = Arc::clone( &queue );

        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_queue.pop( data );
                },
                |err| {
                    tracing::error!( "Audio output error: {}", err );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        stream.play().map_err( |e| OutputError::PlayStream( e.to_string() ) )?;

        Ok( Self {
            stream,
            sample_rate: config.sample_rate.0,
            queue,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn queue( &self ) -> &Arc<SampleQueue> {
        &self.queue
    }


    /// Pauses or resumes the device stream and the queue together.
    pub fn set_paused( &self, paused: bool ) {
        self.queue.set_paused( paused );
        let result = if paused { self.stream.pause().map_err( |e| e.to_string() ) } else { self.stream.play().map_err( |e| e.to_string() ) };
        if let Err( e ) = result {
            tracing::warn!( "Failed to {} stream: {}", if paused { "pause" } else { "resume" }, e );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_mono_source_fills_both_channels() {
        let queue = SampleQueue::new( 16, 2 );
        assert_eq!( queue.push( &[ 0.1, 0.2 ], 1 ), 2 );

        let mut out = [ 1.0; 6 ];
        assert_eq!( queue.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.1, 0.1, 0.2, 0.2, 0.0, 0.0 ] );
    }


    #[test]
    fn test_stereo_source_mixes_to_mono() {
        let queue = SampleQueue::new( 16, 1 );
        queue.push( &[ 0.2, 0.4, 1.0, 0.0 ], 2 );

        let mut out = [ 0.0; 2 ];
        queue.pop( &mut out );
        assert!( ( out[ 0 ] - 0.3 ).abs() < 1e-6 );
        assert!( ( out[ 1 ] - 0.5 ).abs() < 1e-6 );
    }


    #[test]
    fn test_push_stops_at_capacity_on_frame_boundary() {
        let queue = SampleQueue::new( 5, 2 );
        assert_eq!( queue.push( &[ 0.5; 8 ], 2 ), 4 );
        assert_eq!( queue.len(), 4 );
        assert_eq!( queue.push( &[ 0.5; 2 ], 2 ), 0 );
    }


    #[test]
    fn test_paused_queue_outputs_silence() {
        let queue = SampleQueue::new( 8, 2 );
        queue.push( &[ 0.7; 4 ], 2 );
        queue.set_paused( true );

        let mut out = [ 1.0; 4 ];
        assert_eq!( queue.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0; 4 ] );
        assert_eq!( queue.len(), 4 );
    }
}
